use claystore::{build_class, persist, Adapter, ModelClass, ModelDefinition, StorageOptions};

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];

/// Album with a binary `photo` and a text `caption` attachment.
pub fn albums<A>(adapter: A) -> ModelClass
where
    A: Adapter + 'static,
{
    let class = build_class(
        ModelDefinition::new()
            .singular("album")
            .property("title", "string"),
    )
    .expect("album schema compiles");
    persist(&class, None).expect("persist album class");
    class
        .define_attachment("photo", "image/png")
        .expect("photo attachment");
    class
        .define_attachment("caption", "text/plain")
        .expect("caption attachment");
    class
        .set_storage(&StorageOptions::new(), adapter)
        .expect("configure album storage");
    class
}
