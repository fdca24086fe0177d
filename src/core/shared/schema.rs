diesel::table! {
    crm_pipeline_stages (id) {
        id -> Uuid,
        org_id -> Uuid,
        name -> Varchar,
        color -> Nullable<Varchar>,
        stage_order -> Int4,
        probability -> Int4,
        is_closed -> Bool,
        is_won -> Bool,
        is_default -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    crm_leads (id) {
        id -> Uuid,
        org_id -> Uuid,
        customer_id -> Nullable<Uuid>,
        assignee_id -> Nullable<Uuid>,
        title -> Varchar,
        description -> Nullable<Text>,
        status -> Varchar,
        value -> Float8,
        probability -> Int4,
        expected_revenue -> Float8,
        stage_id -> Nullable<Uuid>,
        stage_order -> Int4,
        stage_entered_at -> Nullable<Timestamptz>,
        expected_close_date -> Nullable<Date>,
        closed_at -> Nullable<Timestamptz>,
        lost_reason -> Nullable<Varchar>,
        converted_to_deal_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    crm_deals (id) {
        id -> Uuid,
        org_id -> Uuid,
        customer_id -> Nullable<Uuid>,
        owner_id -> Nullable<Uuid>,
        lead_id -> Nullable<Uuid>,
        title -> Varchar,
        description -> Nullable<Text>,
        status -> Varchar,
        value -> Float8,
        probability -> Int4,
        expected_revenue -> Float8,
        stage_id -> Nullable<Uuid>,
        stage_order -> Int4,
        stage_entered_at -> Nullable<Timestamptz>,
        expected_close_date -> Nullable<Date>,
        actual_close_date -> Nullable<Timestamptz>,
        won_at -> Nullable<Timestamptz>,
        lost_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    crm_stage_history (id) {
        id -> Uuid,
        org_id -> Uuid,
        item_kind -> Varchar,
        item_id -> Uuid,
        stage_id -> Uuid,
        moved_by -> Nullable<Uuid>,
        entered_at -> Timestamptz,
        exited_at -> Nullable<Timestamptz>,
        duration -> Nullable<Int8>,
    }
}

diesel::table! {
    crm_activities (id) {
        id -> Uuid,
        org_id -> Uuid,
        activity_type -> Varchar,
        title -> Varchar,
        description -> Nullable<Text>,
        lead_id -> Nullable<Uuid>,
        deal_id -> Nullable<Uuid>,
        stage_id -> Nullable<Uuid>,
        actor_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    crm_customers (id) {
        id -> Uuid,
        org_id -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    crm_users (id) {
        id -> Uuid,
        org_id -> Uuid,
        display_name -> Varchar,
    }
}

diesel::joinable!(crm_stage_history -> crm_pipeline_stages (stage_id));

diesel::allow_tables_to_appear_in_same_query!(
    crm_pipeline_stages,
    crm_leads,
    crm_deals,
    crm_stage_history,
    crm_activities,
    crm_customers,
    crm_users,
);
