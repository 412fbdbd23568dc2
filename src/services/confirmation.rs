use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::mailer::{EmailAttachment, Mailer, OutgoingEmail};
use super::ticket_pdf::TicketPdf;
use crate::models::{money, BookingContext, Ticket};
use crate::store::{BookingStore, NewNotification, StoreError};

pub const NOTIFICATION_KIND: &str = "booking_confirmed";

/// Что удалось сделать после подтверждения брони.
#[derive(Debug, Clone)]
pub struct ConfirmationReport {
    pub booking_id: Uuid,
    pub notified: bool,
    pub confirmation_emailed: bool,
    pub tickets: Vec<Ticket>,
    pub tickets_emailed: bool,
}

/// Побочные эффекты перехода брони в CONFIRMED.
///
/// Уведомление и письма не критичны: их сбой пишется в лог и не отменяет
/// подтверждение. Выпуск билетов обязателен и идемпотентен, так что
/// повторный запуск не создаст дублей.
pub struct ConfirmationRunner {
    store: Arc<dyn BookingStore>,
    mailer: Arc<dyn Mailer>,
}

impl ConfirmationRunner {
    pub fn new(store: Arc<dyn BookingStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }

    pub async fn run(&self, booking_id: Uuid) -> Result<ConfirmationReport, StoreError> {
        let context = self
            .store
            .booking_context(booking_id)
            .await?
            .ok_or(StoreError::NotFound("booking context"))?;

        let notified = self.notify(&context).await;
        let confirmation_emailed = self.send_confirmation(&context).await;

        let tickets = self.store.ensure_tickets(booking_id).await?;
        info!(%booking_id, tickets = tickets.len(), "🎫 Tickets issued");

        let tickets_emailed = self.send_tickets(&context, &tickets).await;

        Ok(ConfirmationReport {
            booking_id,
            notified,
            confirmation_emailed,
            tickets,
            tickets_emailed,
        })
    }

    async fn notify(&self, context: &BookingContext) -> bool {
        let notification = NewNotification {
            explorer_id: context.explorer.id,
            booking_id: Some(context.booking.id),
            kind: NOTIFICATION_KIND.to_string(),
            title: "Бронирование подтверждено".to_string(),
            body: format!(
                "Оплата получена. Ждем вас на «{}» {}.",
                context.experience.title,
                context.session.starts_at.format("%d.%m.%Y %H:%M UTC")
            ),
        };

        match self.store.record_notification(notification).await {
            Ok(_) => true,
            Err(e) => {
                warn!(booking_id = %context.booking.id, error = %e, "Failed to record notification");
                false
            }
        }
    }

    async fn send_confirmation(&self, context: &BookingContext) -> bool {
        let email = OutgoingEmail {
            to: context.explorer.email.clone(),
            to_name: Some(context.explorer.display_name.clone()),
            subject: format!("Бронирование подтверждено: {}", context.experience.title),
            text: format!(
                "Здравствуйте, {}!\n\nВаше бронирование на «{}» подтверждено.\n\
                 Дата: {}\nГостей: {}\nСумма: {} {}\n\nБилеты придут отдельным письмом.",
                context.explorer.display_name,
                context.experience.title,
                context.session.starts_at.format("%d.%m.%Y %H:%M UTC"),
                context.booking.guests,
                money::format_minor(context.booking.total_amount, &context.booking.currency),
                context.booking.currency,
            ),
            attachments: Vec::new(),
        };

        match self.mailer.send(email).await {
            Ok(()) => true,
            Err(e) => {
                warn!(booking_id = %context.booking.id, error = %e, "Failed to send confirmation email");
                false
            }
        }
    }

    async fn send_tickets(&self, context: &BookingContext, tickets: &[Ticket]) -> bool {
        if tickets.is_empty() {
            return false;
        }

        // Без PDF письмо все равно уходит: коды билетов есть в тексте.
        let attachments = match TicketPdf::render(context, tickets) {
            Ok(pdf) => vec![EmailAttachment {
                filename: format!("tickets-{}.pdf", context.booking.id),
                content_type: "application/pdf".to_string(),
                bytes: pdf,
            }],
            Err(e) => {
                warn!(booking_id = %context.booking.id, error = %e, "Failed to render ticket PDF");
                Vec::new()
            }
        };
        let codes = tickets
            .iter()
            .map(|t| format!("  #{}: {}", t.seat_number, t.code))
            .collect::<Vec<_>>()
            .join("\n");

        let email = OutgoingEmail {
            to: context.explorer.email.clone(),
            to_name: Some(context.explorer.display_name.clone()),
            subject: format!("Ваши билеты: {}", context.experience.title),
            text: format!("Билеты во вложении.\n\nКоды билетов:\n{}\n", codes),
            attachments,
        };

        match self.mailer.send(email).await {
            Ok(()) => true,
            Err(e) => {
                warn!(booking_id = %context.booking.id, error = %e, "Failed to email tickets");
                false
            }
        }
    }
}
