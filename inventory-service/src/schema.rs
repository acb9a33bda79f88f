diesel::table! {
    products (sku) {
        sku -> Varchar,
        name -> Varchar,
        total_stock -> Int4,
        reserved_stock -> Int4,
        unit_price -> Numeric,
    }
}

diesel::table! {
    reservations (id) {
        id -> Int8,
        idempotency_key -> Varchar,
        order_id -> Varchar,
        sku -> Varchar,
        quantity -> Int4,
        status -> Varchar,
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
    products,
    reservations,
    processed_messages,
);
