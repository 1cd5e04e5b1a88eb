use crate::governance::model::{Request, Role, RoleAssignment};

/// Decides whether an actor holds a role on a request.
///
/// Implementations must be pure predicates: the engine asks again on every
/// operation and never caches an answer.
pub trait RoleProvider {
    fn has_role(
        &self,
        request: &Request,
        assignment: Option<&RoleAssignment>,
        actor: &str,
        role: Role,
    ) -> bool;
}

/// Membership check against the request's own requester and the
/// reviewer/approver sets fixed at configuration time.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentRoles;

impl RoleProvider for AssignmentRoles {
    fn has_role(
        &self,
        request: &Request,
        assignment: Option<&RoleAssignment>,
        actor: &str,
        role: Role,
    ) -> bool {
        match role {
            Role::Requester => request.requester == actor,
            Role::Reviewer => assignment
                .map(|roles| roles.reviewers.contains(actor))
                .unwrap_or(false),
            Role::Approver => assignment
                .map(|roles| roles.approvers.contains(actor))
                .unwrap_or(false),
        }
    }
}

impl<T: RoleProvider + ?Sized> RoleProvider for &T {
    fn has_role(
        &self,
        request: &Request,
        assignment: Option<&RoleAssignment>,
        actor: &str,
        role: Role,
    ) -> bool {
        (**self).has_role(request, assignment, actor, role)
    }
}
