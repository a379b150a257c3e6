mod admission;
mod dedup;
mod quota;
mod service;
mod sniff;
mod stager;

pub use admission::{AdmissionController, AdmissionPermit};
pub use dedup::{hash_file, DeduplicationResolver, Resolution};
pub use quota::{admits, QuotaDecision, QuotaEnforcer};
pub use service::{UploadError, UploadReceipt, UploadRequest, UploadService};
pub use sniff::{is_supported_mime_type, normalize_mime_type, sniff, SniffedType, ALLOWED_FORMATS};
pub use stager::{ContentStager, StageError, StagedContent};
