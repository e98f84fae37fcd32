//! Shared element handling for lists and dicts.
//!
//! Elements read from a file start out as [`Element::Stored`], naming the child group that holds
//! them in the source, and turn into [`Element::Loaded`] on first access.

use crate::error::{ContainerError, Result};
use crate::payload::{can_link, same_origin, Payload};
use std::collections::HashSet;
use sylph_storage::{path, GroupHandle, Location, Session};

#[derive(Debug, Clone)]
pub(crate) enum Element<P> {
    Stored(String),
    Loaded(P),
}

pub(crate) fn load<P: Payload>(
    session: &Session,
    source: Option<&GroupHandle>,
    element: &mut Element<P>,
) -> Result<P> {
    match element {
        Element::Loaded(payload) => Ok(payload.clone()),
        Element::Stored(name) => {
            let source = source.ok_or_else(|| ContainerError::MissingElement(name.clone()))?;
            let payload = P::from_group(session, source.child(name)?)?;
            *element = Element::Loaded(payload.clone());
            Ok(payload)
        }
    }
}

fn child_location(target: &GroupHandle, name: &str) -> Option<Location> {
    target
        .location()
        .map(|location| Location::new(location.file, &path::join(&location.path, name)))
}

/// Write `elements` (target name, element) into `target`.
///
/// Writing back into the group the elements were read from only touches elements that changed.
/// Elements that moved to another name are materialized first so no write clobbers data that
/// is still to be read.
pub(crate) fn writeback_elements<P: Payload>(
    session: &Session,
    source: Option<&GroupHandle>,
    mut elements: Vec<(String, &mut Element<P>)>,
    target: &GroupHandle,
) -> Result<()> {
    let in_place = same_origin(source, target);
    if in_place {
        let mut moved = Vec::new();
        for (name, element) in elements.iter_mut() {
            let is_moved = match &**element {
                Element::Stored(original) => original.as_str() != name.as_str(),
                Element::Loaded(payload) => payload
                    .origin()
                    .is_some_and(|origin| Some(origin) != child_location(target, name)),
            };
            if is_moved {
                let payload = load(session, source, element)?;
                **element = Element::Loaded(payload.deep_copy()?);
                moved.push(name.clone());
            }
        }

        let keep: HashSet<&str> = elements.iter().map(|(name, _)| name.as_str()).collect();
        for child in target.children()? {
            if !keep.contains(child.as_str()) {
                target.remove(&child)?;
            }
        }
        for name in &moved {
            target.remove(name)?;
        }
    } else {
        target.clear()?;
    }

    let linkable = can_link(source, target);
    for (name, element) in elements {
        if let Element::Stored(original) = &*element {
            if in_place {
                continue;
            }
            if linkable {
                if let Some(source) = source {
                    target.link_from(&name, source, original)?;
                    continue;
                }
            }
        }
        let payload = load(session, source, element)?;
        let child = target.child(&name)?;
        payload.writeback_into(&child)?;
    }
    Ok(())
}
