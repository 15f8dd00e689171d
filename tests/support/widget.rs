use claystore::{build_class, persist, Adapter, ModelClass, ModelDefinition, StorageOptions};

/// Widget schema shared by the model and adapter suites.
pub fn definition() -> ModelDefinition {
    ModelDefinition::new()
        .singular("widget")
        .property("name", "string")
        .property("count", "number")
        .property("flag", "boolean")
        .property("created", "date")
        .property("tags", "array")
        .property("specs", "hash")
        .property("owner", "reference")
        .optional("notes")
        .enumerable("size", ["small", "medium", "large"])
        .required("name")
}

pub fn widget_class() -> ModelClass {
    build_class(definition()).expect("widget schema compiles")
}

/// A persistent widget class routed to `adapter`.
pub fn stored_widgets<A>(adapter: A) -> ModelClass
where
    A: Adapter + 'static,
{
    stored_widgets_with(StorageOptions::new(), adapter)
}

pub fn stored_widgets_with<A>(options: StorageOptions, adapter: A) -> ModelClass
where
    A: Adapter + 'static,
{
    let class = widget_class();
    persist(&class, None).expect("persist widget class");
    class
        .set_storage(&options, adapter)
        .expect("configure widget storage");
    class
}

/// Sample with every stored property set.
pub fn sample(class: &ModelClass, key: &str, name: &str) -> claystore::Model {
    let mut widget = class.create();
    widget.set_key(key).expect("set key");
    widget.set("name", name).expect("set name");
    widget.set("count", 3).expect("set count");
    widget.set("flag", true).expect("set flag");
    widget
        .set("created", "2013-06-14T10:30:00Z")
        .expect("set created");
    widget
        .set("tags", vec!["red", "blue"])
        .expect("set tags");
    widget.set("size", "large").expect("set size");
    widget
}

/// Keyed widget left at its defaults. The date is pinned so it survives
/// millisecond storage precision.
pub fn blank(class: &ModelClass, key: &str) -> claystore::Model {
    let mut widget = class.create();
    widget.set_key(key).expect("set key");
    widget
        .set("created", "2020-01-01T00:00:00Z")
        .expect("set created");
    widget
}
