mod support;

use claystore::adapter::column::{Cell, ColumnValidator, DEFAULT_KEYSPACE};
use claystore::{
    Adapter, ColumnStoreAdapter, InMemoryColumnStore, Record, StorageOptions, Value,
};
use support::photo::{albums, PNG};
use support::widget::{blank, sample, stored_widgets, stored_widgets_with, widget_class};

#[tokio::test]
async fn provision_creates_two_families_once() {
    let store = InMemoryColumnStore::new();
    let widgets = stored_widgets(ColumnStoreAdapter::new(store.clone()));

    widgets.provision().await.unwrap();
    widgets.provision().await.unwrap();
    assert_eq!(
        store.families(DEFAULT_KEYSPACE),
        vec!["widgets".to_string(), "widgets_attachments".to_string()]
    );
    // keyspace plus two families
    assert_eq!(store.schema_changes(), 3);

    // a second adapter over the same keyspace finds the families in place
    let again = stored_widgets(ColumnStoreAdapter::new(store.clone()));
    again.provision().await.unwrap();
    assert_eq!(store.schema_changes(), 3);
    assert_eq!(store.families(DEFAULT_KEYSPACE).len(), 2);
}

#[test]
fn family_columns_follow_property_types() {
    let class = widget_class();
    claystore::persist(&class, None).unwrap();
    let mut adapter = ColumnStoreAdapter::new(InMemoryColumnStore::new());
    adapter.configure(&StorageOptions::new(), &class).unwrap();

    let family = adapter.family_def();
    assert_eq!(family.name, "widgets");
    let validator = |name: &str| {
        family
            .columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.validator)
    };
    assert_eq!(validator("name"), Some(ColumnValidator::Utf8));
    assert_eq!(validator("count"), Some(ColumnValidator::Double));
    assert_eq!(validator("flag"), Some(ColumnValidator::Boolean));
    assert_eq!(validator("created"), Some(ColumnValidator::Date));
    assert_eq!(validator("tags"), Some(ColumnValidator::Utf8));
    assert_eq!(validator("size"), Some(ColumnValidator::Double));
    assert_eq!(validator("owner"), None);
    assert_eq!(ColumnValidator::Double.to_string(), "DoubleType");

    let attachments = adapter.attachment_family_def();
    assert_eq!(attachments.name, "widgets_attachments");
    assert_eq!(attachments.columns.len(), 3);
}

#[tokio::test]
async fn rows_store_native_cells() {
    let store = InMemoryColumnStore::new();
    let widgets = stored_widgets_with(
        StorageOptions::new().with_keyspace("inventory"),
        ColumnStoreAdapter::new(store.clone()),
    );

    let widget = sample(&widgets, "k1", "sprocket");
    let expected = widget.serialize();
    let mut widget = widget;
    widget.save().await.unwrap();

    let row = store.row("inventory", "widgets", "k1").expect("stored row");
    assert_eq!(row.get("name"), Some(&Cell::Utf8("sprocket".into())));
    assert_eq!(row.get("count"), Some(&Cell::Double(3.0)));
    assert_eq!(row.get("flag"), Some(&Cell::Boolean(true)));
    assert_eq!(row.get("size"), Some(&Cell::Double(2.0)));
    assert_eq!(row.get("tags"), Some(&Cell::Utf8("[\"red\",\"blue\"]".into())));
    assert!(matches!(row.get("created"), Some(Cell::Date(_))));
    assert!(!row.contains_key("notes"));

    let loaded = widgets.get("k1").await.unwrap().unwrap();
    assert_eq!(loaded.serialize(), expected);
    assert!(widgets.get("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn merge_updates_columns_in_place() {
    let store = InMemoryColumnStore::new();
    let widgets = stored_widgets(ColumnStoreAdapter::new(store.clone()));
    let mut widget = sample(&widgets, "k1", "sprocket");
    widget.save().await.unwrap();

    let mut partial = Record::new();
    partial.insert("count".into(), Value::from(21));
    partial.insert("size".into(), Value::from("small"));
    widget.merge(&partial).await.unwrap();

    let row = store.row(DEFAULT_KEYSPACE, "widgets", "k1").unwrap();
    assert_eq!(row.get("count"), Some(&Cell::Double(21.0)));
    assert_eq!(row.get("size"), Some(&Cell::Double(0.0)));
    assert_eq!(row.get("name"), Some(&Cell::Utf8("sprocket".into())));
}

#[tokio::test]
async fn batch_reads_and_deletes() {
    let widgets = stored_widgets(ColumnStoreAdapter::new(InMemoryColumnStore::new()));
    for key in ["c", "a", "b"] {
        sample(&widgets, key, key).save().await.unwrap();
    }

    let keys: Vec<String> = ["b", "zz", "c"].iter().map(|k| k.to_string()).collect();
    let names: Vec<Option<Value>> = widgets
        .get_batch(&keys)
        .await
        .unwrap()
        .iter()
        .map(|m| m.as_ref().and_then(|m| m.get("name")))
        .collect();
    assert_eq!(names, vec![Some(Value::from("b")), None, Some(Value::from("c"))]);

    widgets
        .destroy_many(Some(&["a".to_string(), "c".to_string()][..]))
        .await
        .unwrap();
    let left: Vec<Option<String>> = widgets.all().await.unwrap().iter().map(|m| m.key()).collect();
    assert_eq!(left, vec![Some("b".to_string())]);
}

#[tokio::test]
async fn attachments_live_in_their_own_family() {
    let store = InMemoryColumnStore::new();
    let albums = albums(ColumnStoreAdapter::new(store.clone()));

    let mut album = albums.create();
    album.set_key("a1").unwrap();
    album.set("title", "summer").unwrap();
    album.set_attachment("photo", PNG).unwrap();
    album.save().await.unwrap();

    let row = store
        .row(DEFAULT_KEYSPACE, "albums_attachments", "a1:photo")
        .expect("attachment row");
    assert_eq!(row.get("body"), Some(&Cell::Bytes(PNG.to_vec())));

    let mut loaded = albums.get("a1").await.unwrap().unwrap();
    assert_eq!(loaded.attachment_meta("photo").unwrap().length, PNG.len());
    assert!(loaded.attachment_meta("caption").is_none());
    let body = loaded.fetch_attachment("photo").await.unwrap().unwrap();
    assert_eq!(body.as_bytes(), PNG);

    loaded.destroy().await.unwrap();
    assert!(store
        .row(DEFAULT_KEYSPACE, "albums_attachments", "a1:photo")
        .is_none());
}

#[test]
fn inflate_rejects_non_objects() {
    let class = widget_class();
    claystore::persist(&class, None).unwrap();
    let mut adapter = ColumnStoreAdapter::new(InMemoryColumnStore::new());
    adapter.configure(&StorageOptions::new(), &class).unwrap();

    assert!(adapter.inflate(&serde_json::Value::Null).unwrap().is_none());
    assert!(adapter.inflate(&serde_json::json!("row")).unwrap().is_none());

    let model = adapter
        .inflate(&serde_json::json!({"name": "[not json]", "tags": "[\"x\",\"y\"]", "size": 1}))
        .unwrap()
        .unwrap();
    assert_eq!(model.get("name"), Some(Value::from("[not json]")));
    assert_eq!(model.get("tags"), Some(Value::from(vec!["x", "y"])));
    assert_eq!(model.get("size"), Some(Value::from("medium")));
}

#[tokio::test]
async fn default_instances_read_back_identically() {
    let widgets = stored_widgets(ColumnStoreAdapter::new(InMemoryColumnStore::new()));
    let mut widget = blank(&widgets, "k1");
    widget.save().await.unwrap();

    let loaded = widgets.get("k1").await.unwrap().unwrap();
    assert_eq!(loaded.serialize(), widget.serialize());
}

#[tokio::test]
async fn rows_carry_their_key() {
    let store = InMemoryColumnStore::new();
    let widgets = stored_widgets(ColumnStoreAdapter::new(store.clone()));
    sample(&widgets, "k1", "sprocket").save().await.unwrap();

    let row = store.row(DEFAULT_KEYSPACE, "widgets", "k1").unwrap();
    assert_eq!(row.get("_id"), Some(&Cell::Utf8("k1".into())));

    let mut models = widgets
        .construct_many(&[serde_json::json!({"_id": "k1", "name": "sprocket"})])
        .unwrap();
    assert_eq!(models[0].key().as_deref(), Some("k1"));
    models[0].destroy().await.unwrap();
    assert!(store.row(DEFAULT_KEYSPACE, "widgets", "k1").is_none());
}
