pub mod checkout;
pub mod confirmation;
pub mod hold;
pub mod mailer;
pub mod reconcile;
pub mod refund;
pub mod sweeper;
pub mod ticket_pdf;

pub use checkout::{CheckoutCommand, CheckoutResult, CheckoutService};
pub use confirmation::{ConfirmationReport, ConfirmationRunner};
pub use mailer::{Mailer, MailError, OutgoingEmail, SmtpMailer};
pub use reconcile::Reconciler;
pub use refund::RefundService;
pub use sweeper::ExpirationSweeper;
