//! What gets synced: endpoints, node shapes, foreign keys and indexes.

use apigraph_core::{FieldMapping, ForeignReference, SyncStage};
use apigraph_graph::{EntitySchema, ForeignKeyLink, LinkDirection};

/// One remote collection and the node label it becomes.
#[derive(Debug, Clone, Copy)]
pub struct EntitySpec {
    /// Name used for lookback overrides (`SYNC_WORKHOURS_DAYS_BACK`).
    pub name: &'static str,
    pub label: &'static str,
    pub endpoint: &'static str,
    /// REFERENCE, CORE_ENTITIES or TRANSACTIONAL.
    pub stage: SyncStage,
    pub fields: &'static [FieldMapping],
    pub references: &'static [ForeignReference],
    /// Requested with `startDate`/`endDate` from the entity's lookback window.
    pub date_filtered: bool,
}

/// A relationship resolved from a foreign key property after all nodes exist.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipSpec {
    /// Key in the run statistics.
    pub name: &'static str,
    pub link: ForeignKeyLink,
}

const LAST_MODIFIED: FieldMapping =
    FieldMapping::renamed("lastModified", &["lastModifiedDateTime", "lastUpdatedDateTime"]);

pub const BUSINESS_UNITS: EntitySpec = EntitySpec {
    name: "businessunits",
    label: "BusinessUnit",
    endpoint: "/businessunits",
    stage: SyncStage::Reference,
    fields: &[
        FieldMapping::same("name"),
        FieldMapping::same("code"),
        FieldMapping::same("isActive"),
        LAST_MODIFIED,
    ],
    references: &[],
    date_filtered: false,
};

pub const USERS: EntitySpec = EntitySpec {
    name: "users",
    label: "User",
    endpoint: "/users",
    stage: SyncStage::CoreEntities,
    fields: &[
        FieldMapping::same("firstName"),
        FieldMapping::same("lastName"),
        FieldMapping::same("email"),
        FieldMapping::same("code"),
        FieldMapping::same("title"),
        FieldMapping::same("isActive"),
        LAST_MODIFIED,
    ],
    references: &[
        ForeignReference::new("businessUnit", "businessUnitGuid"),
        ForeignReference::new("supervisor", "supervisorGuid"),
        ForeignReference::new("role", "roleGuid"),
        ForeignReference::new("team", "teamGuid"),
        ForeignReference::new("department", "departmentGuid"),
    ],
    date_filtered: false,
};

pub const CUSTOMERS: EntitySpec = EntitySpec {
    name: "customers",
    label: "Customer",
    endpoint: "/customers",
    stage: SyncStage::CoreEntities,
    fields: &[
        FieldMapping::same("name"),
        FieldMapping::same("number"),
        FieldMapping::same("email"),
        FieldMapping::same("website"),
        FieldMapping::same("isActive"),
        LAST_MODIFIED,
    ],
    references: &[
        ForeignReference::new("owner", "ownerGuid"),
        ForeignReference::new("businessUnit", "businessUnitGuid"),
    ],
    date_filtered: false,
};

pub const PROJECTS: EntitySpec = EntitySpec {
    name: "projects",
    label: "Project",
    endpoint: "/projects",
    stage: SyncStage::CoreEntities,
    fields: &[
        FieldMapping::same("name"),
        FieldMapping::same("number"),
        FieldMapping::same("isClosed"),
        FieldMapping::renamed("startDate", &["startDate", "plannedStartDate"]),
        FieldMapping::renamed("deadline", &["deadline", "plannedEndDate"]),
        FieldMapping::same("expectedValue"),
        LAST_MODIFIED,
    ],
    references: &[
        ForeignReference::new("customer", "customerGuid"),
        ForeignReference::new("projectManager", "managerGuid"),
        ForeignReference::new("businessUnit", "businessUnitGuid"),
    ],
    date_filtered: false,
};

pub const WORK_HOURS: EntitySpec = EntitySpec {
    name: "workhours",
    label: "WorkHour",
    endpoint: "/workhours",
    stage: SyncStage::Transactional,
    fields: &[
        FieldMapping::same("eventDate"),
        FieldMapping::same("quantity"),
        FieldMapping::same("isBillable"),
        FieldMapping::same("unitCost"),
        FieldMapping::same("unitPrice"),
        FieldMapping::same("description"),
        LAST_MODIFIED,
    ],
    references: &[
        ForeignReference::new("user", "userGuid"),
        ForeignReference::new("project", "projectGuid"),
    ],
    date_filtered: true,
};

pub const INVOICES: EntitySpec = EntitySpec {
    name: "invoices",
    label: "Invoice",
    endpoint: "/invoices",
    stage: SyncStage::Transactional,
    fields: &[
        FieldMapping::same("number"),
        FieldMapping::same("invoiceDate"),
        FieldMapping::same("dueDate"),
        FieldMapping::renamed("totalAmount", &["totalAmount", "totalExcludingTax"]),
        FieldMapping::same("currency"),
        FieldMapping::same("status"),
        LAST_MODIFIED,
    ],
    references: &[
        ForeignReference::new("customer", "customerGuid"),
        ForeignReference::new("project", "projectGuid"),
    ],
    date_filtered: true,
};

/// Every entity in sync order.
pub fn entities() -> Vec<EntitySpec> {
    vec![BUSINESS_UNITS, USERS, CUSTOMERS, PROJECTS, WORK_HOURS, INVOICES]
}

const fn holder_link(
    rel_type: &'static str,
    holder_label: &'static str,
    fk_property: &'static str,
    referenced_label: &'static str,
) -> ForeignKeyLink {
    ForeignKeyLink {
        rel_type,
        holder_label,
        fk_property,
        referenced_label,
        direction: LinkDirection::FromHolder,
    }
}

const fn parent_link(
    rel_type: &'static str,
    holder_label: &'static str,
    fk_property: &'static str,
    referenced_label: &'static str,
) -> ForeignKeyLink {
    ForeignKeyLink {
        rel_type,
        holder_label,
        fk_property,
        referenced_label,
        direction: LinkDirection::FromReferenced,
    }
}

/// Every relationship resolved in the RELATIONSHIPS stage.
pub fn relationships() -> Vec<RelationshipSpec> {
    vec![
        RelationshipSpec {
            name: "user_business_unit",
            link: holder_link("IN_BUSINESS_UNIT", "User", "businessUnitGuid", "BusinessUnit"),
        },
        RelationshipSpec {
            name: "user_supervisor",
            link: holder_link("REPORTS_TO", "User", "supervisorGuid", "User"),
        },
        RelationshipSpec {
            name: "customer_owner",
            link: holder_link("OWNED_BY", "Customer", "ownerGuid", "User"),
        },
        RelationshipSpec {
            name: "customer_business_unit",
            link: holder_link("IN_BUSINESS_UNIT", "Customer", "businessUnitGuid", "BusinessUnit"),
        },
        RelationshipSpec {
            name: "customer_projects",
            link: parent_link("HAS_PROJECT", "Project", "customerGuid", "Customer"),
        },
        RelationshipSpec {
            name: "project_manager",
            link: holder_link("MANAGED_BY", "Project", "managerGuid", "User"),
        },
        RelationshipSpec {
            name: "workhour_user",
            link: holder_link("LOGGED_BY", "WorkHour", "userGuid", "User"),
        },
        RelationshipSpec {
            name: "workhour_project",
            link: holder_link("FOR_PROJECT", "WorkHour", "projectGuid", "Project"),
        },
        RelationshipSpec {
            name: "customer_invoices",
            link: parent_link("HAS_INVOICE", "Invoice", "customerGuid", "Customer"),
        },
        RelationshipSpec {
            name: "invoice_project",
            link: holder_link("FOR_PROJECT", "Invoice", "projectGuid", "Project"),
        },
    ]
}

/// Indexes created in the INDEX stage.
pub fn schema() -> Vec<EntitySchema> {
    vec![
        EntitySchema {
            label: "BusinessUnit",
            indexed: &["name"],
            composite: &[],
            fulltext: None,
        },
        EntitySchema {
            label: "User",
            indexed: &["email", "isActive", "businessUnitGuid", "supervisorGuid"],
            composite: &[("user_name_idx", &["lastName", "firstName"])],
            fulltext: Some(("user_search", &["firstName", "lastName", "email"])),
        },
        EntitySchema {
            label: "Customer",
            indexed: &["name", "number", "isActive", "ownerGuid", "businessUnitGuid"],
            composite: &[],
            fulltext: Some(("customer_search", &["name", "number"])),
        },
        EntitySchema {
            label: "Project",
            indexed: &["name", "number", "isClosed", "customerGuid", "managerGuid"],
            composite: &[("project_status_deadline_idx", &["isClosed", "deadline"])],
            fulltext: Some(("project_search", &["name", "number"])),
        },
        EntitySchema {
            label: "WorkHour",
            indexed: &["eventDate", "isBillable", "userGuid", "projectGuid"],
            composite: &[("work_hour_user_date_idx", &["userGuid", "eventDate"])],
            fulltext: None,
        },
        EntitySchema {
            label: "Invoice",
            indexed: &["invoiceDate", "status", "customerGuid", "projectGuid"],
            composite: &[],
            fulltext: None,
        },
    ]
}
