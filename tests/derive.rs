use chrono::{DateTime, TimeZone, Utc};
use claystore::{persist, Error, MemoryAdapter, Schema, StorageOptions, Value};

#[derive(Debug, Clone, PartialEq, Schema)]
#[schema(singular = "comment", plural = "comments")]
struct Comment {
    #[schema(required)]
    title: String,
    votes: i64,
    score: f64,
    pinned: bool,
    posted: DateTime<Utc>,
    tags: Vec<String>,
    #[schema(enumerable("draft", "published"))]
    status: String,
    #[schema(reference)]
    author_id: String,
    note: Option<String>,
    #[schema(skip)]
    cached: usize,
}

#[derive(Debug, Clone, Schema)]
struct ShippingLabel {
    #[schema(type = "hash")]
    address: claystore::Record,
    #[schema(optional)]
    extra: Value,
}

fn comment() -> Comment {
    Comment {
        title: "First!".into(),
        votes: 12,
        score: 0.75,
        pinned: true,
        posted: Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap(),
        tags: vec!["meta".into(), "intro".into()],
        status: "published".into(),
        author_id: "user-7".into(),
        note: None,
        cached: 99,
    }
}

#[test]
fn field_types_become_property_types() {
    let class = Comment::build_class().unwrap();
    assert_eq!(class.name(), "comment");
    assert_eq!(class.plural(), Some("comments"));

    let types = class.property_types();
    let type_of = |name: &str| types.get(name).map(String::as_str);
    assert_eq!(type_of("title"), Some("string"));
    assert_eq!(type_of("votes"), Some("number"));
    assert_eq!(type_of("score"), Some("number"));
    assert_eq!(type_of("pinned"), Some("boolean"));
    assert_eq!(type_of("posted"), Some("date"));
    assert_eq!(type_of("tags"), Some("array"));
    assert_eq!(type_of("author_id"), Some("string"));
    assert_eq!(type_of("note"), Some("untyped"));
    assert_eq!(type_of("cached"), None);
    assert_eq!(
        class.enumeration("status"),
        Some(&["draft".to_string(), "published".to_string()][..])
    );
    assert_eq!(class.property_type("author"), Some("reference"));

    let mut blank = class.create();
    assert!(!blank.valid());
    assert!(blank.errors().contains_key("title"));
}

#[test]
fn struct_values_pass_through_the_setters() {
    let class = Comment::build_class().unwrap();
    let original = comment();
    let mut model = original.to_model(&class).unwrap();
    assert!(model.valid());
    assert_eq!(model.get("status"), Some(Value::from("published")));
    assert_eq!(model.get("note"), Some(Value::Null));

    let back = Comment::from_model(&model).unwrap();
    assert_eq!(back, Comment { cached: 0, ..original.clone() });

    let bad = Comment {
        status: "archived".into(),
        ..original
    };
    assert!(matches!(bad.to_model(&class), Err(Error::Validation(_))));
}

#[tokio::test]
async fn derived_classes_persist_like_any_other() {
    let class = Comment::build_class().unwrap();
    persist(&class, None).unwrap();
    class
        .set_storage(&StorageOptions::new(), MemoryAdapter::new())
        .unwrap();

    let mut model = comment().to_model(&class).unwrap();
    model.set_key("c1").unwrap();
    model.save().await.unwrap();

    let loaded = class.get("c1").await.unwrap().unwrap();
    let restored = Comment::from_model(&loaded).unwrap();
    assert_eq!(restored, Comment { cached: 0, ..comment() });
}

#[test]
fn explicit_types_and_optional_fields() {
    let class = ShippingLabel::build_class().unwrap();
    assert_eq!(class.name(), "shipping_label");
    assert_eq!(class.plural(), Some("shipping_labels"));
    assert_eq!(class.property_type("address"), Some("hash"));
    assert_eq!(class.property_type("extra"), Some("untyped"));

    let label = ShippingLabel {
        address: claystore::Record::from([("city".to_string(), Value::from("Oslo"))]),
        extra: Value::from(vec![1, 2]),
    };
    let model = label.to_model(&class).unwrap();
    let back = ShippingLabel::from_model(&model).unwrap();
    assert_eq!(back.address, label.address);
    assert_eq!(back.extra, label.extra);
}
