//! Soft-delete ("paranoid") scoping.
//!
//! A record is frozen while `freezed_at` is set. Reads and updates only see
//! active records unless the caller opts in through [`QueryOptions`]; hard
//! deletes only ever reach frozen records.

use time::OffsetDateTime;
use uuid::Uuid;

use super::filter::{Cond, Filter, Update, Value};

pub const FREEZED_AT: &str = "freezed_at";
pub const RESTORED_AT: &str = "restored_at";

/// Options shared by every read and update path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Expose frozen and active records alike.
    pub include_frozen: bool,
}

impl QueryOptions {
    pub fn include_frozen() -> Self {
        Self {
            include_frozen: true,
        }
    }
}

/// Conditions for a read or update on an entity.
pub fn scope(paranoid: bool, filter: Filter, opts: QueryOptions) -> Vec<Cond> {
    let mut conds = filter.into_conds();
    if paranoid && !opts.include_frozen {
        conds.push(Cond::Missing(FREEZED_AT));
    }
    conds
}

/// Conditions for a physical delete. Active records of a paranoid entity are
/// never matched.
pub fn hard_delete_scope(paranoid: bool, filter: Filter) -> Vec<Cond> {
    let mut conds = filter.into_conds();
    if paranoid && !conds.contains(&Cond::Exists(FREEZED_AT)) {
        conds.push(Cond::Exists(FREEZED_AT));
    }
    conds
}

/// Filter and options for the archive view (frozen records only) or the
/// default view.
pub fn archive_view(filter: Filter, archive: bool) -> (Filter, QueryOptions) {
    if archive {
        (filter.exists(FREEZED_AT), QueryOptions::include_frozen())
    } else {
        (filter, QueryOptions::default())
    }
}

pub fn freeze_update(actor: Option<Uuid>, now: OffsetDateTime) -> Update {
    Update::new()
        .set(FREEZED_AT, now)
        .set("updated_by", Value::from(actor))
        .unset(RESTORED_AT)
}

pub fn restore_update(actor: Option<Uuid>, now: OffsetDateTime) -> Update {
    Update::new()
        .set(RESTORED_AT, now)
        .set("updated_by", Value::from(actor))
        .unset(FREEZED_AT)
}
