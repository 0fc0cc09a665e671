pub mod login;
pub mod verify_audit;

#[derive(Debug)]
pub enum Action {
    Login(login::Args),
    VerifyAudit(verify_audit::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Login(args) => login::execute(args).await,
            Self::VerifyAudit(args) => verify_audit::execute(&args),
        }
    }
}
