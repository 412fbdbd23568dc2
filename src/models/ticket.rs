use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Valid,
    Used,
    Void,
}

text_enum!(TicketStatus {
    Valid => "VALID",
    Used => "USED",
    Void => "VOID",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub code: String,
    pub seat_number: i32,
    pub status: TicketStatus,
    pub booking_id: Uuid,
    pub session_id: Uuid,
    pub explorer_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

// Без 0/O и 1/I, чтобы код можно было продиктовать.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Генерирует код билета вида `XXXX-XXXX`.
pub fn generate_ticket_code() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(9);
    for i in 0..8 {
        if i == 4 {
            code.push('-');
        }
        let idx = rng.gen_range(0..CODE_ALPHABET.len());
        code.push(CODE_ALPHABET[idx] as char);
    }
    code
}

/// Сколько раз перегенерировать код, совпавший с уже выданным.
pub const CODE_ATTEMPTS: usize = 8;

/// Первый сгенерированный код, которого нет среди занятых.
pub fn unique_ticket_code(
    mut generate: impl FnMut() -> String,
    is_taken: impl Fn(&str) -> bool,
) -> Option<String> {
    (0..CODE_ATTEMPTS).map(|_| generate()).find(|code| !is_taken(code))
}
