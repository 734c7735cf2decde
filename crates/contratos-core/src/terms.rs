use rand::Rng;
use rust_decimal::Decimal;

pub const LINKING_CODE_LEN: usize = 4;
pub const APPROVAL_WINDOW_HOURS: i64 = 24;

const LINKING_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// 1% platform fee, settled to cents.
pub fn service_fee(amount: Decimal) -> Decimal {
    (amount * Decimal::new(1, 2)).round_dp(2)
}

pub fn random_linking_code<R: Rng>(rng: &mut R) -> String {
    (0..LINKING_CODE_LEN)
        .map(|_| LINKING_CODE_ALPHABET[rng.gen_range(0..LINKING_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn is_valid_linking_code(code: &str) -> bool {
    code.len() == LINKING_CODE_LEN
        && code.bytes().all(|b| LINKING_CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn fee_is_one_percent_of_amount() {
        assert_eq!(service_fee(Decimal::new(10000, 2)), Decimal::new(100, 2));
        assert_eq!(service_fee(Decimal::new(250075, 2)), Decimal::new(2501, 2));
    }

    #[test]
    fn fee_rounds_to_cents() {
        // 123.45 * 0.01 = 1.2345 -> 1.23
        assert_eq!(service_fee(Decimal::new(12345, 2)), Decimal::new(123, 2));
        // 999.99 * 0.01 = 9.9999 -> 10.00
        assert_eq!(service_fee(Decimal::new(99999, 2)), Decimal::new(1000, 2));
    }

    #[test]
    fn fee_of_zero_is_zero() {
        assert_eq!(service_fee(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn generated_codes_use_the_shared_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let code = random_linking_code(&mut rng);
            assert_eq!(code.len(), LINKING_CODE_LEN);
            assert!(is_valid_linking_code(&code), "bad code {code}");
        }
    }

    #[test]
    fn code_validation_rejects_bad_shapes() {
        assert!(is_valid_linking_code("A3F9"));
        assert!(is_valid_linking_code("0000"));
        assert!(!is_valid_linking_code("a3f9"));
        assert!(!is_valid_linking_code("A3F"));
        assert!(!is_valid_linking_code("A3F99"));
        assert!(!is_valid_linking_code("A3-9"));
        assert!(!is_valid_linking_code(""));
    }
}
