use std::sync::Arc;

use super::{AuthContext, BoxFuture, Factor, FactorKind, Verdict};
use crate::gate::credentials::CredentialStore;
use crate::gate::error::AuthError;

/// Secret or PIN checked against the credential store.
#[derive(Clone)]
pub struct KnowledgeFactor {
    store: Arc<dyn CredentialStore>,
}

impl KnowledgeFactor {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

impl Factor for KnowledgeFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Knowledge
    }

    fn verify<'a>(&'a self, ctx: &'a AuthContext) -> BoxFuture<'a, Result<Verdict, AuthError>> {
        Box::pin(async move {
            if self
                .store
                .verify_knowledge_factor(ctx.principal().id(), ctx.secret())
            {
                Ok(Verdict::Pass)
            } else {
                Ok(Verdict::Fail("secret mismatch".to_string()))
            }
        })
    }
}
