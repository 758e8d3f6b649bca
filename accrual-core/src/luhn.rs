//! Luhn (mod 10) checksum for order numbers

/// Returns `true` when `number` is a non-empty ASCII digit string whose
/// Luhn checksum is zero.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    checksum(number.bytes().rev(), false) % 10 == 0
}

/// Digit that makes `payload` followed by it a valid Luhn number.
///
/// Returns `None` for empty or non-numeric payloads.
pub fn check_digit(payload: &str) -> Option<u32> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // The check digit will sit at position 0, so the payload's last digit is doubled.
    let sum = checksum(payload.bytes().rev(), true);
    Some((10 - sum % 10) % 10)
}

fn checksum(digits_from_right: impl Iterator<Item = u8>, double_first: bool) -> u32 {
    digits_from_right
        .enumerate()
        .map(|(idx, b)| {
            let digit = u32::from(b - b'0');
            let doubled = (idx % 2 == 0) == double_first;
            if doubled {
                let d = digit * 2;
                if d > 9 {
                    d - 9
                } else {
                    d
                }
            } else {
                digit
            }
        })
        .sum()
}
