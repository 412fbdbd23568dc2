//! PDF с билетами: одна страница A4 на билет.
//!
//! Текст набирается встроенным шрифтом DejaVu Sans, поэтому кириллица
//! в названиях впечатлений и именах гостей печатается как есть.

use printpdf::{IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use std::io::Cursor;
use thiserror::Error;

use crate::models::{BookingContext, Ticket};

static TICKET_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN_LEFT: Mm = Mm(25.0);
const FIRST_BASELINE: f32 = 262.0;
const LAYER: &str = "ticket";

#[derive(Debug, Error)]
pub enum TicketPdfError {
    #[error("no tickets to render")]
    Empty,

    #[error("pdf rendering failed: {0}")]
    Render(#[from] printpdf::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line {
    pub size: f32,
    pub text: String,
}

pub struct TicketPdf;

impl TicketPdf {
    pub fn render(context: &BookingContext, tickets: &[Ticket]) -> Result<Vec<u8>, TicketPdfError> {
        let (first, rest) = tickets.split_first().ok_or(TicketPdfError::Empty)?;

        let title = format!("Билеты: {}", context.experience.title);
        let (doc, page, layer) = PdfDocument::new(title, PAGE_WIDTH, PAGE_HEIGHT, LAYER);
        let font = doc.add_external_font(Cursor::new(TICKET_FONT))?;

        let first_layer = doc.get_page(page).get_layer(layer);
        Self::draw(&first_layer, &font, &Self::ticket_lines(context, first, tickets.len()));

        for ticket in rest {
            let layer = Self::add_page(&doc);
            Self::draw(&layer, &font, &Self::ticket_lines(context, ticket, tickets.len()));
        }

        Ok(doc.save_to_bytes()?)
    }

    fn add_page(doc: &PdfDocumentReference) -> PdfLayerReference {
        let (page, layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, LAYER);
        doc.get_page(page).get_layer(layer)
    }

    fn draw(layer: &PdfLayerReference, font: &IndirectFontRef, lines: &[Line]) {
        let mut y = FIRST_BASELINE;
        for line in lines {
            layer.use_text(line.text.as_str(), line.size, MARGIN_LEFT, Mm(y), font);
            // кегль в пунктах, шаг строки в миллиметрах
            y -= line.size * 0.3528 + 6.0;
        }
    }

    pub(crate) fn ticket_lines(context: &BookingContext, ticket: &Ticket, total: usize) -> Vec<Line> {
        let mut lines = vec![
            Line { size: 22.0, text: context.experience.title.clone() },
            Line {
                size: 13.0,
                text: format!("Билет {} из {}", ticket.seat_number, total),
            },
            Line { size: 30.0, text: ticket.code.clone() },
            Line {
                size: 12.0,
                text: format!("Гость: {}", context.explorer.display_name),
            },
            Line {
                size: 12.0,
                text: format!(
                    "Начало: {}",
                    context.session.starts_at.format("%d.%m.%Y %H:%M UTC")
                ),
            },
        ];
        if let Some(location) = &context.experience.location {
            lines.push(Line { size: 12.0, text: format!("Место: {}", location) });
        }
        lines.push(Line {
            size: 9.0,
            text: format!("Бронирование {}", context.booking.id),
        });
        lines
    }
}
