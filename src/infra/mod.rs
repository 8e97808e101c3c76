//! Infrastructure layer: error taxonomy, collaborator and store seams, and
//! their in-memory and PostgreSQL implementations.

mod error;
mod memory;
mod postgres;
mod success;
mod traits;

pub use error::*;
pub use memory::{
    InMemoryKeyService, InMemoryMembershipStore, InMemorySuccessLog, StaticCertificateService,
    StaticEnrollmentService, StaticGroupResolver, StaticIdentityService,
};
pub use postgres::{run_migrations, PgMembershipStore, PgSuccessLogStore};
pub use success::{SuccessRecorder, GROUP_LOG};
pub use traits::*;
