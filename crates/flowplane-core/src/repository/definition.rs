//! Workflow definition storage port.

use flowplane_types::error::RepositoryError;
use flowplane_types::workflow::WorkflowDefinition;
use uuid::Uuid;

/// Persistence contract for workflow definitions and their revision families.
pub trait DefinitionRepository: Send + Sync {
    /// Insert a new revision or update an existing draft in place.
    ///
    /// Updating a published revision must fail with
    /// `RepositoryError::Conflict` -- published definitions are immutable.
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Fetch one revision by its id.
    fn get_definition(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// The family's current published revision, if any.
    fn current_published(
        &self,
        family_id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Mark a draft revision published and demote any previously published
    /// revision of the same family, atomically.
    fn publish(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<WorkflowDefinition, RepositoryError>> + Send;

    /// All revisions of a family, ordered by revision ascending.
    fn list_revisions(
        &self,
        family_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Highest revision number in a family (0 when the family is new).
    fn max_revision(
        &self,
        family_id: &Uuid,
    ) -> impl Future<Output = Result<i64, RepositoryError>> + Send;
}
