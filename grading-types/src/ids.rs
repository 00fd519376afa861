//! Newtype ids. Wrapping `Uuid` per entity keeps cross-entity mixups (passing
//! a `QuestionId` where a `SubmissionId` is expected) a compile error instead
//! of a runtime bug a reviewer has to catch by reading call sites.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(TenantId);
id_type!(ExamId);
id_type!(QuestionId);
id_type!(SubmissionId);
id_type!(UserId);
id_type!(AuditLogId);
id_type!(FeedbackEventId);
