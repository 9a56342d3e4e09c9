// ticketlog schema - normalized work-tracking tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    identities (id) {
        id -> Text,                      // remote id, or unique name when no id is present
        display_name -> Nullable<Text>,
        url -> Nullable<Text>,
        unique_name -> Nullable<Text>,
        image_url -> Nullable<Text>,
        descriptor -> Nullable<Text>,
    }
}

diesel::table! {
    work_items (id) {
        id -> Integer,
        rev -> Nullable<Integer>,
        work_item_type -> Nullable<Text>,
        title -> Nullable<Text>,
        state -> Nullable<Text>,
        reason -> Nullable<Text>,
        history -> Nullable<Text>,
        description -> Nullable<Text>,
        created_date -> Nullable<Text>,
        changed_date -> Nullable<Text>,
        state_change_date -> Nullable<Text>,
        activated_date -> Nullable<Text>,
        closed_date -> Nullable<Text>,
        comment_count -> Nullable<Integer>,
        team_project -> Nullable<Text>,
        area_path -> Nullable<Text>,
        area_id -> Nullable<Integer>,
        area_level1 -> Nullable<Text>,
        area_level2 -> Nullable<Text>,
        area_level3 -> Nullable<Text>,
        area_level4 -> Nullable<Text>,
        iteration_path -> Nullable<Text>,
        iteration_id -> Nullable<Integer>,
        iteration_level1 -> Nullable<Text>,
        iteration_level2 -> Nullable<Text>,
        iteration_level3 -> Nullable<Text>,
        iteration_level4 -> Nullable<Text>,
        parent -> Nullable<Integer>,     // soft self-reference, no FK
        story_points -> Nullable<Double>,
        original_estimate -> Nullable<Double>,
        remaining_work -> Nullable<Double>,
        completed_work -> Nullable<Double>,
        priority -> Nullable<Integer>,
        stack_rank -> Nullable<Double>,
        watermark -> Nullable<BigInt>,
        person_id -> Nullable<BigInt>,
        custom_work -> Nullable<Text>,
        created_by_id -> Nullable<Text>,
        changed_by_id -> Nullable<Text>,
        authorized_as_id -> Nullable<Text>,
        assigned_to_id -> Nullable<Text>,
        extra_fields -> Text,            // full raw field map as JSON
    }
}

diesel::table! {
    work_item_tags (work_item_id, tag) {
        work_item_id -> Integer,
        tag -> Text,
    }
}

diesel::table! {
    revisions (id) {
        id -> Integer,
        work_item_id -> Integer,
        rev -> Integer,
        work_item_type -> Nullable<Text>,
        title -> Nullable<Text>,
        state -> Nullable<Text>,
        reason -> Nullable<Text>,
        team_project -> Nullable<Text>,
        area_path -> Nullable<Text>,
        area_id -> Nullable<Integer>,
        node_name -> Nullable<Text>,
        iteration_path -> Nullable<Text>,
        iteration_id -> Nullable<Integer>,
        iteration_level1 -> Nullable<Text>,
        iteration_level2 -> Nullable<Text>,
        iteration_level3 -> Nullable<Text>,
        iteration_level4 -> Nullable<Text>,
        assigned_to_id -> Nullable<Text>,
        created_date -> Nullable<Text>,
        created_by_id -> Nullable<Text>,
        changed_date -> Nullable<Text>,
        changed_by_id -> Nullable<Text>,
        authorized_date -> Nullable<Text>,
        authorized_as_id -> Nullable<Text>,
        revised_date -> Nullable<Text>,
        closed_date -> Nullable<Text>,
        closed_by_id -> Nullable<Text>,
        watermark -> Nullable<BigInt>,
        comment_count -> Nullable<Integer>,
        story_points -> Nullable<Double>,
        original_estimate -> Nullable<Double>,
        remaining_work -> Nullable<Double>,
        completed_work -> Nullable<Double>,
        priority -> Nullable<Integer>,
        stack_rank -> Nullable<Double>,
    }
}

diesel::table! {
    comments (comment_id) {
        comment_id -> Integer,
        work_item_id -> Integer,
        rev -> Nullable<Integer>,
        comment_type -> Nullable<Text>,
        state -> Nullable<Text>,
        body -> Nullable<Text>,
        created_date -> Nullable<Text>,
        created_by_id -> Nullable<Text>,
        modified_date -> Nullable<Text>,
        modified_by_id -> Nullable<Text>,
    }
}

// ============================================================================
// Classification hierarchies (iterations / areas), flattened
// ============================================================================

diesel::table! {
    classification_nodes (node_id) {
        node_id -> Integer,
        structure_group -> Text,         // 'iterations' or 'areas'
        name -> Text,
        path -> Nullable<Text>,
        start_date -> Nullable<Text>,
        finish_date -> Nullable<Text>,
        timeframe -> Nullable<Text>,
    }
}

// ============================================================================
// Run log
// ============================================================================

diesel::table! {
    ingest_runs (id) {
        id -> Integer,
        run_id -> Text,                  // UUID
        status -> Text,                  // 'completed' or 'cancelled'
        started_at -> Text,
        completed_at -> Text,
        ids_total -> Integer,
        chunks -> Integer,
        ingested -> Integer,
        skipped -> Integer,
        identities_skipped -> Integer,
        revisions_skipped -> Integer,
        comments_skipped -> Integer,
        tags_written -> Integer,
        revisions_written -> Integer,
        comments_written -> Integer,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    identities,
    work_items,
    work_item_tags,
    revisions,
    comments,
);
