// Esquema Diesel de las tablas del motor ETL.

diesel::table! {
    run_events (seq) {
        seq -> Int8,
        run_id -> Uuid,
        ts -> Timestamptz,
        event_type -> Text,
        payload -> Jsonb,
    }
}

diesel::table! {
    dimension_versions (entity_type, business_key, version_number) {
        entity_type -> Text,
        business_key -> Text,
        version_number -> Int8,
        attributes -> Jsonb,
        valid_from -> Timestamptz,
        valid_to -> Nullable<Timestamptz>,
        is_current -> Bool,
    }
}

diesel::table! {
    applied_operations (operation_id) {
        operation_id -> Text,
        applied_at -> Timestamptz,
    }
}

diesel::table! {
    quarantined_records (id) {
        id -> Int8,
        run_id -> Uuid,
        step -> Text,
        entity_type -> Text,
        record_key -> Nullable<Text>,
        detail -> Text,
        payload -> Jsonb,
        quarantined_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(run_events,
                                              dimension_versions,
                                              applied_operations,
                                              quarantined_records,);
