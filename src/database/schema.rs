diesel::table! {
    hash_fields (key, field) {
        key -> Text,
        field -> Text,
        value -> Text,
    }
}
