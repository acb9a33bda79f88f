diesel::table! {
    sagas (saga_id) {
        saga_id -> Uuid,
        idempotency_key -> Varchar,
        order_id -> Varchar,
        customer_id -> Varchar,
        status -> Varchar,
        current_step -> Varchar,
        order_data -> Jsonb,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Int8,
        idempotency_key -> Varchar,
        event_type -> Varchar,
        payload -> Jsonb,
        published -> Bool,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    processed_messages (idempotency_key, event_type) {
        message_id -> Varchar,
        idempotency_key -> Varchar,
        event_type -> Varchar,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    sagas,
    outbox_events,
    processed_messages,
);
