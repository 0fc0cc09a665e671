//! Role to module dispatch.
//!
//! Downstream modules only ever see a [`Grant`]: the role and the session
//! token. What a module does with it is its own business.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::audit::{Ack, AuditError, AuditLog, AuditRecord};
use super::credentials::Role;
use super::session::{Session, SessionIssuer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no module registered for role {0}")]
    UnknownRole(Role),
}

/// What a downstream module receives after authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Grant {
    pub role: Role,
    pub session_token: String,
}

impl From<&Session> for Grant {
    fn from(session: &Session) -> Self {
        Self {
            role: session.role(),
            session_token: session.token().to_string(),
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("role", &self.role)
            .field("session_token", &"***")
            .finish()
    }
}

pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;

    fn endpoint(&self) -> &str;

    /// Evidence tagging, for modules that offer it.
    fn as_evidence(&self) -> Option<&EvidenceModule> {
        None
    }
}

pub type ModuleHandle = Arc<dyn Module>;

#[derive(Default, Clone)]
pub struct AccessRouter {
    routes: HashMap<Role, ModuleHandle>,
}

impl AccessRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(mut self, role: Role, module: ModuleHandle) -> Self {
        self.routes.insert(role, module);
        self
    }

    /// Admin panel, forensic evidence dashboard and read-only guest view.
    #[must_use]
    pub fn with_defaults(audit: AuditLog, sessions: Arc<SessionIssuer>) -> Self {
        Self::new()
            .with_module(Role::Admin, Arc::new(AdminPanel))
            .with_module(Role::Analyst, Arc::new(EvidenceModule::new(audit, sessions)))
            .with_module(Role::Guest, Arc::new(GuestView))
    }

    /// # Errors
    /// Returns `RouteError::UnknownRole` when no module serves `role`.
    pub fn route(&self, role: Role) -> Result<ModuleHandle, RouteError> {
        match self.routes.get(&role) {
            Some(module) => {
                info!(role = %role, module = module.name(), "routing session");
                Ok(Arc::clone(module))
            }
            None => {
                warn!(role = %role, "no module for role");
                Err(RouteError::UnknownRole(role))
            }
        }
    }
}

impl fmt::Debug for AccessRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<(&Role, &'static str)> = self
            .routes
            .iter()
            .map(|(role, module)| (role, module.name()))
            .collect();
        routes.sort_by_key(|(role, _)| role.as_str());
        f.debug_struct("AccessRouter").field("routes", &routes).finish()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AdminPanel;

impl Module for AdminPanel {
    fn name(&self) -> &'static str {
        "admin-panel"
    }

    fn endpoint(&self) -> &str {
        "/admin/dashboard"
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GuestView;

impl Module for GuestView {
    fn name(&self) -> &'static str {
        "guest-view"
    }

    fn endpoint(&self) -> &str {
        "/guest/view"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error("session is not valid")]
    InvalidSession,

    #[error("role {0} may not tag evidence")]
    Forbidden(Role),

    #[error("evidence id must not be empty")]
    EmptyEvidenceId,

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Forensic evidence dashboard. Every tag is written to the audit log.
#[derive(Clone, Debug)]
pub struct EvidenceModule {
    audit: AuditLog,
    sessions: Arc<SessionIssuer>,
}

impl EvidenceModule {
    #[must_use]
    pub fn new(audit: AuditLog, sessions: Arc<SessionIssuer>) -> Self {
        Self { audit, sessions }
    }

    /// Tag a piece of evidence under the caller's session.
    ///
    /// # Errors
    /// Fails when the session is not live, is not an Analyst session, the
    /// evidence id is blank, or the audit record cannot be written.
    pub async fn tag_evidence(
        &self,
        grant: &Grant,
        evidence_id: &str,
        note: &str,
    ) -> Result<Ack, EvidenceError> {
        let session = self
            .sessions
            .resolve(&grant.session_token)
            .ok_or(EvidenceError::InvalidSession)?;
        if session.role() != Role::Analyst || grant.role != Role::Analyst {
            return Err(EvidenceError::Forbidden(session.role()));
        }

        let evidence_id = evidence_id.trim();
        if evidence_id.is_empty() {
            return Err(EvidenceError::EmptyEvidenceId);
        }

        let record = AuditRecord::action(
            session.principal_id(),
            session.role(),
            format!("evidence={evidence_id} note={}", note.trim()),
        );
        let ack = self.audit.append(record).await?;
        info!(principal = session.principal_id(), evidence = evidence_id, "evidence tagged");
        Ok(ack)
    }
}

impl Module for EvidenceModule {
    fn name(&self) -> &'static str {
        "forensic-evidence"
    }

    fn endpoint(&self) -> &str {
        "/analyst/evidence"
    }

    fn as_evidence(&self) -> Option<&EvidenceModule> {
        Some(self)
    }
}
