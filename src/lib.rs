//! SQL Guard
//!
//! Validation and normalization layer between an LLM text-to-SQL generator
//! and a read-only query engine. The generator produces untrusted text that
//! claims to be a SELECT statement; [`SqlGuard::validate`] deterministically
//! either rewrites it into a canonical safe form (single statement, trailing
//! semicolon stripped, table/column allowlists enforced, result size
//! bounded) or rejects it with a stable, caller-facing reason.
//!
//! ```
//! use sqlguard::{GuardPolicy, SqlGuard};
//!
//! let guard = SqlGuard::new(GuardPolicy::default()).unwrap();
//! let safe = guard
//!     .validate("SELECT event_date, ad_revenue FROM mart.daily_campaign_kpi;")
//!     .unwrap();
//! assert_eq!(
//!     safe,
//!     "SELECT event_date, ad_revenue FROM mart.daily_campaign_kpi LIMIT 1000"
//! );
//! ```

pub mod error;
pub mod guard;
pub mod policy;
pub mod text2sql;

pub use error::{GuardError, PolicyError, Text2SqlError};
pub use guard::SqlGuard;
pub use policy::GuardPolicy;
pub use text2sql::{GeneratedSql, Text2SqlClient};
