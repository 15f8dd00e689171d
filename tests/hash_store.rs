mod support;

use claystore::{
    Adapter, HashStoreAdapter, InMemoryHashStore, Record, StorageOptions, Value,
};
use support::photo::{albums, PNG};
use support::widget::{blank, sample, stored_widgets, stored_widgets_with};

#[tokio::test]
async fn records_live_in_one_hash_per_key() {
    let store = InMemoryHashStore::new();
    let widgets = stored_widgets(HashStoreAdapter::new(store.clone()));

    sample(&widgets, "k1", "sprocket").save().await.unwrap();

    let hash = store.hash("widgets:k1").expect("record hash");
    assert_eq!(hash.get("name").map(String::as_str), Some("\"sprocket\""));
    assert_eq!(hash.get("count").map(String::as_str), Some("3"));
    assert_eq!(hash.get("tags").map(String::as_str), Some("[\"red\",\"blue\"]"));
    assert!(store.contains_key("widgets:ids"));
    assert!(!store.contains_key("widgets:k1:attaches"));

    let loaded = widgets.get("k1").await.unwrap().unwrap();
    assert_eq!(loaded.get("name"), Some(Value::from("sprocket")));
    assert_eq!(loaded.get("size"), Some(Value::from("large")));
    assert_eq!(
        loaded.serialize(),
        sample(&widgets, "k1", "sprocket").serialize()
    );
    assert!(widgets.get("k2").await.unwrap().is_none());
}

#[tokio::test]
async fn dbname_option_overrides_the_namespace() {
    let store = InMemoryHashStore::new();
    let widgets = stored_widgets_with(
        StorageOptions::new().with_dbname("parts"),
        HashStoreAdapter::new(store.clone()),
    );
    sample(&widgets, "k1", "sprocket").save().await.unwrap();
    assert!(store.contains_key("parts:k1"));
    assert!(!store.contains_key("widgets:k1"));
}

#[tokio::test]
async fn batch_reads_use_one_pipeline_and_keep_order() {
    let store = InMemoryHashStore::new();
    let widgets = stored_widgets(HashStoreAdapter::new(store.clone()));
    for key in ["a", "b"] {
        sample(&widgets, key, key).save().await.unwrap();
    }

    let before = store.pipelines();
    let keys = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
    let models = widgets.get_batch(&keys).await.unwrap();
    assert_eq!(store.pipelines(), before + 1);
    let found: Vec<Option<String>> = models.iter().map(|m| m.as_ref().and_then(|m| m.key())).collect();
    assert_eq!(found, vec![Some("b".into()), None, Some("a".into())]);

    let all: Vec<Option<String>> = widgets.all().await.unwrap().iter().map(|m| m.key()).collect();
    assert_eq!(all, vec![Some("a".into()), Some("b".into())]);
}

#[tokio::test]
async fn merge_touches_only_named_fields() {
    let store = InMemoryHashStore::new();
    let widgets = stored_widgets(HashStoreAdapter::new(store.clone()));
    let mut widget = sample(&widgets, "k1", "sprocket");
    widget.save().await.unwrap();

    let mut partial = Record::new();
    partial.insert("count".into(), Value::from(8));
    widget.merge(&partial).await.unwrap();

    let hash = store.hash("widgets:k1").unwrap();
    assert_eq!(hash.get("count").map(String::as_str), Some("8"));
    assert_eq!(hash.get("name").map(String::as_str), Some("\"sprocket\""));
}

#[tokio::test]
async fn destroy_removes_hashes_and_index_entries() {
    let store = InMemoryHashStore::new();
    let widgets = stored_widgets(HashStoreAdapter::new(store.clone()));
    for key in ["a", "b", "c"] {
        sample(&widgets, key, key).save().await.unwrap();
    }

    let mut a = widgets.get("a").await.unwrap().unwrap();
    a.destroy().await.unwrap();
    assert!(!store.contains_key("widgets:a"));

    widgets
        .destroy_many(Some(&["b".to_string(), "c".to_string()][..]))
        .await
        .unwrap();
    assert!(widgets.all().await.unwrap().is_empty());
    assert!(!store.contains_key("widgets:c"));
}

#[tokio::test]
async fn attachments_round_trip_through_the_side_hash() {
    let store = InMemoryHashStore::new();
    let albums = albums(HashStoreAdapter::new(store.clone()));

    let mut album = albums.create();
    album.set_key("a1").unwrap();
    album.set("title", "summer").unwrap();
    album.set_attachment("photo", PNG).unwrap();
    album.save().await.unwrap();
    assert!(store.contains_key("albums:a1:attaches"));

    let mut loaded = albums.get("a1").await.unwrap().unwrap();
    let meta = loaded.attachment_meta("photo").unwrap();
    assert!(meta.stub);
    assert_eq!(meta.length, PNG.len());
    let body = loaded.fetch_attachment("photo").await.unwrap().unwrap();
    assert_eq!(body.as_bytes(), PNG);

    loaded.remove_attachment("photo").await.unwrap();
    assert!(loaded.fetch_attachment("photo").await.unwrap().is_none());
}

#[test]
fn inflate_decodes_json_and_keeps_raw_strings() {
    let widgets = support::widget::widget_class();
    claystore::persist(&widgets, None).unwrap();
    let mut adapter = HashStoreAdapter::new(InMemoryHashStore::new());
    adapter.configure(&StorageOptions::new(), &widgets).unwrap();

    let model = adapter
        .inflate(&serde_json::json!({
            "name": "plain text",
            "count": "12",
            "tags": "[\"x\"]",
            "flag": true,
        }))
        .unwrap()
        .unwrap();
    assert_eq!(model.get("name"), Some(Value::from("plain text")));
    assert_eq!(model.get("count"), Some(Value::from(12)));
    assert_eq!(model.get("tags"), Some(Value::from(vec!["x"])));
    assert_eq!(model.get("flag"), Some(Value::from(true)));

    assert!(adapter.inflate(&serde_json::Value::Null).unwrap().is_none());
    assert!(adapter.inflate(&serde_json::json!(["x"])).unwrap().is_none());
}

#[tokio::test]
async fn default_instances_read_back_identically() {
    let widgets = stored_widgets(HashStoreAdapter::new(InMemoryHashStore::new()));
    let mut widget = blank(&widgets, "k1");
    widget.save().await.unwrap();

    let loaded = widgets.get("k1").await.unwrap().unwrap();
    assert_eq!(loaded.serialize(), widget.serialize());
}

#[tokio::test]
async fn stored_hashes_construct_keyed_instances() {
    let store = InMemoryHashStore::new();
    let widgets = stored_widgets(HashStoreAdapter::new(store.clone()));
    sample(&widgets, "k1", "sprocket").save().await.unwrap();

    let hash = store.hash("widgets:k1").unwrap();
    assert_eq!(hash.get("_id").map(String::as_str), Some("\"k1\""));
    let raw = serde_json::to_value(&hash).unwrap();
    let mut models = widgets.construct_many(&[raw]).unwrap();
    assert_eq!(models[0].key().as_deref(), Some("k1"));
    assert_eq!(models[0].get("name"), Some(Value::from("sprocket")));

    models[0].destroy().await.unwrap();
    assert!(!store.contains_key("widgets:k1"));
}

#[tokio::test]
async fn a_declared_key_property_names_the_hash() {
    let store = InMemoryHashStore::new();
    let class = claystore::build_class(
        claystore::ModelDefinition::new()
            .singular("session")
            .property("key", "string")
            .property("user", "string"),
    )
    .unwrap();
    claystore::persist(&class, None).unwrap();
    class
        .set_storage(&StorageOptions::new(), HashStoreAdapter::new(store.clone()))
        .unwrap();

    let mut session = class.create();
    session.set("key", "s1").unwrap();
    session.set("user", "ada").unwrap();
    session.save().await.unwrap();

    let hash = store.hash("sessions:s1").unwrap();
    assert_eq!(hash.get("key").map(String::as_str), Some("\"s1\""));
    assert!(!hash.contains_key("_id"));
    let loaded = class.get("s1").await.unwrap().unwrap();
    assert_eq!(loaded.key().as_deref(), Some("s1"));
}
