use pretty_assertions::assert_eq;
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use sylph_types::{
    resource_fn, Column, ContainerError, Dict, ErrorKind, File, FileList, OpenOptions, Session,
    Table, TableFile, Text,
};

fn write_table(session: &Session, path: &Path) {
    let mut file = TableFile::open(session, path, OpenOptions::write()).expect("open for write");
    let table = file.payload();
    table.set_name("readings");
    table.set_column("id", vec![1_i64, 2, 3]).expect("id");
    table.set_column("value", vec![0.25, 0.5, 0.75]).expect("value");
    table.set_column("label", vec!["a/b", "c\\d", "e"]).expect("label");
    table.set_attribute("source", serde_json::json!("sensor-7"));
    file.close().expect("close");
}

fn columns(table: &Table) -> Vec<(String, Column)> {
    table
        .column_names()
        .into_iter()
        .map(|name| {
            let column = (*table.get_column(&name).expect("column")).clone();
            (name, column)
        })
        .collect()
}

#[test]
fn table_round_trips_through_a_file() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("readings.sydata");
    let session = Session::default();
    write_table(&session, &path);

    let file = TableFile::open(&session, &path, OpenOptions::read()).expect("open for read");
    assert_eq!(file.type_alias().as_deref(), Some("table"));
    let table = file.payload();
    assert_eq!(table.name(), "readings");
    assert_eq!(table.number_of_rows(), 3);
    assert_eq!(
        table.column_names(),
        vec!["id".to_string(), "value".to_string(), "label".to_string()]
    );
    assert_eq!(
        *table.get_column("label").expect("label"),
        Column::from(vec!["a/b", "c\\d", "e"])
    );
    assert_eq!(table.attribute("source"), Some(serde_json::json!("sensor-7")));
}

#[test]
fn reading_checks_the_declared_type() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("text.sydata");
    let session = Session::default();
    let mut file = File::<Text>::open(&session, &path, OpenOptions::write()).expect("write");
    file.payload().set("hello");
    file.close().expect("close");

    let err = TableFile::open(&session, &path, OpenOptions::read()).expect_err("wrong type");
    assert!(matches!(err, ContainerError::TypeMismatch { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Format);

    let text = File::<Text>::open(&session, &path, OpenOptions::read()).expect("read text");
    assert_eq!(text.payload().get().expect("text"), "hello");
}

#[test]
fn linking_matches_copying_without_codec_work() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let source_path = tmp.path().join("source.sydata");
    let linked_path = tmp.path().join("linked.sydata");
    let copied_path = tmp.path().join("copied.sydata");
    let session = Session::default();
    write_table(&session, &source_path);

    let linkable = TableFile::open(&session, &source_path, OpenOptions::read().import_links(true))
        .expect("open linkable source");
    let mut linked = TableFile::open(&session, &linked_path, OpenOptions::write()).expect("target");
    let before = session.codec_stats();
    linkable.writeback(&mut linked).expect("link writeback");
    linked.close().expect("close linked");
    let after = session.codec_stats();
    assert_eq!(after.encodes, before.encodes);
    assert_eq!(after.decodes, before.decodes);
    assert_eq!(after.links - before.links, 3);

    let plain = TableFile::open(&session, &source_path, OpenOptions::read()).expect("open source");
    let mut copied = TableFile::open(&session, &copied_path, OpenOptions::write()).expect("target");
    let before = session.codec_stats();
    plain.writeback(&mut copied).expect("copy writeback");
    copied.close().expect("close copied");
    let after = session.codec_stats();
    assert_eq!(after.encodes - before.encodes, 3);
    assert_eq!(after.links, before.links);

    let linked = TableFile::open(&session, &linked_path, OpenOptions::read()).expect("reopen");
    let copied = TableFile::open(&session, &copied_path, OpenOptions::read()).expect("reopen");
    assert_eq!(columns(linked.payload()), columns(copied.payload()));
    assert_eq!(linked.payload().name(), copied.payload().name());
    assert_eq!(linked.payload().attributes(), copied.payload().attributes());
}

#[test]
fn only_modified_columns_are_copied() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let source_path = tmp.path().join("source.sydata");
    let target_path = tmp.path().join("target.sydata");
    let session = Session::default();
    write_table(&session, &source_path);

    let source = TableFile::open(&session, &source_path, OpenOptions::read().import_links(true))
        .expect("open source");
    source
        .payload()
        .set_column("value", vec![1.0, 2.0, 3.0])
        .expect("modify");
    let mut target = TableFile::open(&session, &target_path, OpenOptions::write()).expect("target");

    let before = session.codec_stats();
    source.writeback(&mut target).expect("writeback");
    let after = session.codec_stats();
    assert_eq!(after.links - before.links, 2);
    assert_eq!(after.encodes - before.encodes, 1);
    assert_eq!(
        *target.payload().get_column("value").expect("value"),
        Column::from(vec![1.0, 2.0, 3.0])
    );
}

#[test]
fn writeback_needs_a_writable_target() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("ro.sydata");
    let session = Session::default();
    write_table(&session, &path);

    let source = TableFile::from_payload(Table::new(&session));
    let mut read_only = TableFile::open(&session, &path, OpenOptions::read()).expect("open");
    let err = source.writeback(&mut read_only).expect_err("read-only target");
    assert!(matches!(err, ContainerError::ReadOnlyTarget));
    assert_eq!(err.kind(), ErrorKind::Protocol);

    let mut in_memory = TableFile::from_payload(Table::new(&session));
    assert!(matches!(
        source.writeback(&mut in_memory),
        Err(ContainerError::ReadOnlyTarget)
    ));
}

#[test]
fn writing_back_into_the_origin_is_a_no_op() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("self.sydata");
    let session = Session::default();

    let mut target = TableFile::open(&session, &path, OpenOptions::write()).expect("target");
    let source = TableFile::from_payload(Table::new(&session));
    source.payload().set_column("x", vec![true, false]).expect("x");
    source.writeback(&mut target).expect("first writeback");

    let view = target.copy();
    assert_eq!(view.origin(), target.group().and_then(|group| group.location()));
    let before = session.codec_stats();
    view.writeback(&mut target).expect("self writeback");
    assert_eq!(session.codec_stats(), before);
    target.close().expect("close");
}

#[test]
fn write_mode_ignores_import_links() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("w.sydata");
    let session = Session::default();
    let mut file = TableFile::open(
        &session,
        &path,
        OpenOptions::write().import_links(true).type_alias("measurements"),
    )
    .expect("open");
    assert!(file.can_write());
    assert_eq!(file.type_alias().as_deref(), Some("measurements"));
    file.close().expect("close");
}

#[test]
fn close_is_idempotent_and_releases_the_file() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("close.sydata");
    let session = Session::default();
    write_table(&session, &path);

    let mut file = TableFile::open(&session, &path, OpenOptions::read()).expect("open");
    file.payload().get_column("id").expect("load a column");
    assert!(session.registry().is_open(&path));
    file.close().expect("first close");
    file.close().expect("second close");
    assert!(file.is_closed());
    assert!(!session.registry().is_open(&path));

    let mut writer = TableFile::open(&session, &path, OpenOptions::write()).expect("reopen");
    writer.close().expect("close writer");
}

#[test]
fn second_writer_is_rejected() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("busy.sydata");
    let session = Session::default();
    let _writer = TableFile::open(&session, &path, OpenOptions::write()).expect("first");
    let err = TableFile::open(&session, &path, OpenOptions::write()).expect_err("second");
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn resources_are_released_exactly_once() {
    let session = Session::default();
    let released = Rc::new(Cell::new(0));
    let counter = released.clone();
    let acquire_session = session.clone();
    let mut file = File::from_resource(resource_fn(
        move || Ok(Text::new(&acquire_session, "generated")),
        move || {
            counter.set(counter.get() + 1);
            Ok(())
        },
    ))
    .expect("acquire");

    assert_eq!(file.payload().get().expect("text"), "generated");
    file.close().expect("close");
    file.close().expect("close again");
    drop(file);
    assert_eq!(released.get(), 1);
}

#[test]
fn failed_acquire_still_releases() {
    let released = Rc::new(Cell::new(false));
    let flag = released.clone();
    let err = File::<Text>::from_resource(resource_fn(
        || Err(ContainerError::MissingElement("payload".to_string())),
        move || {
            flag.set(true);
            Ok(())
        },
    ))
    .expect_err("acquire fails");
    assert!(matches!(err, ContainerError::MissingElement(_)));
    assert!(released.get());
}

#[test]
fn shallow_copies_alias_and_deep_copies_do_not() {
    let session = Session::default();
    let file = TableFile::from_payload(Table::new(&session));
    file.payload().set_column("n", vec![1_i64, 2]).expect("n");

    let shallow = file.copy();
    let deep = file.deep_copy().expect("deep copy");
    file.payload().set_column("n", vec![3_i64, 4]).expect("mutate");

    assert_eq!(
        *shallow.payload().get_column("n").expect("n"),
        Column::from(vec![3_i64, 4])
    );
    assert_eq!(
        *deep.payload().get_column("n").expect("n"),
        Column::from(vec![1_i64, 2])
    );
}

#[test]
fn list_elements_are_linked_as_whole_groups() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let source_path = tmp.path().join("list.sydata");
    let target_path = tmp.path().join("list-linked.sydata");
    let session = Session::default();

    let mut file =
        FileList::<Table>::open(&session, &source_path, OpenOptions::write()).expect("write");
    for start in [0_i64, 10, 20] {
        let table = Table::new(&session);
        table.set_column("n", vec![start, start + 1]).expect("n");
        file.payload().push(table);
    }
    file.close().expect("close");

    let source = FileList::<Table>::open(&session, &source_path, OpenOptions::read().import_links(true))
        .expect("read");
    assert_eq!(source.payload().len(), 3);
    let mut target =
        FileList::<Table>::open(&session, &target_path, OpenOptions::write()).expect("target");
    let before = session.codec_stats();
    source.writeback(&mut target).expect("writeback");
    assert_eq!(session.codec_stats().links - before.links, 3);
    target.close().expect("close");

    let target = FileList::<Table>::open(&session, &target_path, OpenOptions::read()).expect("read");
    let second = target.payload().get(1).expect("element");
    assert_eq!(*second.get_column("n").expect("n"), Column::from(vec![10_i64, 11]));
}

#[test]
fn dict_values_are_fetched_once() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("dict.sydata");
    let session = Session::default();

    let mut file = File::<Dict<Text>>::open(&session, &path, OpenOptions::write()).expect("write");
    file.payload().insert("greeting", Text::new(&session, "hi"));
    file.payload().insert("a/b", Text::new(&session, "slash"));
    file.close().expect("close");

    let file = File::<Dict<Text>>::open(&session, &path, OpenOptions::read()).expect("read");
    let dict = file.payload();
    assert_eq!(dict.keys(), vec!["a/b".to_string(), "greeting".to_string()]);
    assert!(!dict.is_cached("greeting"));

    let first = dict.get("greeting").expect("greeting");
    assert!(dict.is_cached("greeting"));
    first.set("changed in memory");
    assert_eq!(
        dict.get("greeting").expect("greeting").get().expect("text"),
        "changed in memory"
    );

    dict.cache_all().expect("cache all");
    dict.cache_all().expect("cache all again");
    assert_eq!(dict.get("a/b").expect("a/b").get().expect("text"), "slash");
    assert_eq!(File::<Dict<Text>>::from_payload(dict.clone()).data_type().to_string(), "{text}");
}

#[test]
fn in_place_edits_rewrite_only_what_changed() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("inplace.sydata");
    let session = Session::default();

    let mut target = TableFile::open(&session, &path, OpenOptions::write()).expect("target");
    let source = TableFile::from_payload(Table::new(&session));
    source.payload().set_column("keep", vec![1_i64, 2]).expect("keep");
    source.payload().set_column("drop", vec![3_i64, 4]).expect("drop");
    source.writeback(&mut target).expect("writeback");

    let table = target.payload();
    assert!(table.remove_column("drop"));
    table.set_column("new", vec!["x", "y"]).expect("new");
    let before = session.codec_stats();
    target.close().expect("close");
    assert_eq!(session.codec_stats().encodes - before.encodes, 1);

    let reread = TableFile::open(&session, &path, OpenOptions::read()).expect("reread");
    assert_eq!(
        reread.payload().column_names(),
        vec!["keep".to_string(), "new".to_string()]
    );
    assert_eq!(
        *reread.payload().get_column("keep").expect("keep"),
        Column::from(vec![1_i64, 2])
    );
}

#[test]
fn session_clear_releases_open_files() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("session.sydata");
    let session = Session::default();
    write_table(&session, &path);

    let mut file = TableFile::open(&session, &path, OpenOptions::read()).expect("open");
    session.clear().expect("clear");
    assert_eq!(session.registry().open_count(), 0);
    file.close().expect("closing after clear");
}

#[test]
fn stored_columns_survive_clear_data() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join("cleared.sydata");
    let session = Session::default();
    write_table(&session, &path);

    let file = TableFile::open(&session, &path, OpenOptions::read()).expect("open");
    let before = file.payload().get_column("id").expect("first read");
    session.clear_data();
    assert_eq!(session.cache().metrics().resident_entries, 0);
    assert_eq!(file.payload().get_column("id").expect("re-read"), before);
}
