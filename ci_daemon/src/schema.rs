//! Diesel table definitions for the build store.
//!
//! Both tables are key → JSONB documents; the extra columns on
//! `ci_build_results` are denormalized for lookups.

diesel::table! {
    ci_build_results (id) {
        id -> Int8,
        course -> Varchar,
        username -> Varchar,
        labnum -> Int4,
        payload -> Nullable<Jsonb>,
        create_date -> Nullable<Timestamptz>,
        write_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    ci_owners (owner_key) {
        owner_key -> Varchar,
        kind -> Varchar,
        payload -> Jsonb,
        write_date -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(ci_build_results, ci_owners);
