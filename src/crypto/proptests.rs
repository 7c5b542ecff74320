//! Property-based tests for derivation and the envelope

use super::envelope::{decrypt, encrypt, SealedPayload};
use super::{derive, SharedCode};
use proptest::prelude::*;

proptest! {
    /// Property: derivation is a pure function of the code
    #[test]
    fn derivation_is_deterministic(code in "[a-z]{1,8}-[a-z]{1,8}-[0-9]{3}") {
        let code = SharedCode::new(&code).unwrap();
        let (id1, key1) = derive(&code);
        let (id2, key2) = derive(&code);
        prop_assert_eq!(id1, id2);
        prop_assert!(key1 == key2);
    }

    /// Property: distinct codes give distinct group ids
    #[test]
    fn distinct_codes_distinct_groups(a in "[a-z0-9-]{1,24}", b in "[a-z0-9-]{1,24}") {
        prop_assume!(a != b);
        let (id_a, _) = derive(&SharedCode::new(&a).unwrap());
        let (id_b, _) = derive(&SharedCode::new(&b).unwrap());
        prop_assert_ne!(id_a, id_b);
    }

    /// Property: decrypt(encrypt(t)) == t for any text
    #[test]
    fn envelope_roundtrip(text in any::<String>()) {
        let (_, key) = derive(&SharedCode::new("happy-cat-482").unwrap());
        let sealed = encrypt(&text, &key).unwrap();
        prop_assert_eq!(decrypt(&sealed, &key), Some(text));
    }

    /// Property: a single flipped ciphertext bit is always detected
    #[test]
    fn envelope_rejects_tampering(
        text in ".{0,64}",
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (_, key) = derive(&SharedCode::new("happy-cat-482").unwrap());
        let sealed = encrypt(&text, &key).unwrap();
        let mut data = hex::decode(&sealed.data).unwrap();
        let i = position.index(data.len());
        data[i] ^= 1 << bit;

        let forged = SealedPayload { iv: sealed.iv.clone(), data: hex::encode(data) };
        prop_assert_eq!(decrypt(&forged, &key), None);
    }
}
