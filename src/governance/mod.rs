pub mod audit;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod execution;
pub mod facets;
pub mod filter;
pub mod gate;
pub mod model;
pub mod review;
pub mod roles;
pub mod store;

pub use audit::{AuditAction, AuditEntry, AuditLog, ChainVerification};
pub use catalog::{CandidateItem, CandidateStream, CatalogQuery, ItemCatalog, StaticCatalog};
pub use engine::GovernanceEngine;
pub use error::{CatalogError, EngineError, GovernanceError};
pub use execution::{ExecutionEngine, ExecutionTrigger, PollPolicy};
pub use facets::{CountCheck, FacetCounter, FacetCounts, FacetDimension};
pub use filter::{AgeRange, ExtensionClass, ItemFilter, SizeRange};
pub use gate::ApprovalGate;
pub use model::{
    ActionType, Decision, ExecutionJob, ItemAttributes, JobStatus, NewRequest, Request,
    RequestStatus, ReviewItem, ReviewStatus, Role, RoleAssignment,
};
pub use review::{BulkDecision, ItemFailure, ReviewSession};
pub use roles::{AssignmentRoles, RoleProvider};
pub use store::{ConfigureRequest, RequestStore};
