/// Статусы хранятся в БД как TEXT; макрос дает `as_str`/`FromStr`/`Display`.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(crate::models::UnknownVariant {
                        kind: stringify!($ty),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}


#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

pub mod booking;
pub mod context;
pub mod gateway;
pub mod money;
pub mod payment;
pub mod ticket;

pub use booking::{Booking, BookingStatus, PaymentStatus};
pub use context::{BookingContext, EmailSettings, Experience, ExperienceSession, Explorer, Notification};
pub use gateway::{GatewayType, PaymentGateway};
pub use payment::{Payment, PaymentState, Refund, RefundStatus};
pub use ticket::{Ticket, TicketStatus};
