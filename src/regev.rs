use rand::Rng;

use crate::params::LweParams;

// ============================================================================
// Reusable primitives (used by both Regev and PIR)
// ============================================================================

/// Compute dot product: a·s mod 2^64 (wrapping arithmetic)
pub fn dot_product(a: &[u64], s: &[u64]) -> u64 {
    a.iter()
        .zip(s.iter())
        .map(|(&ai, &si)| ai.wrapping_mul(si))
        .fold(0u64, |acc, x| acc.wrapping_add(x))
}

/// Embed a signed plaintext as Δ·μ in ℤ_q
#[inline]
pub fn encode(msg: i64, params: &LweParams, plaintext_bits: u32) -> u64 {
    (msg as u64).wrapping_mul(params.delta(plaintext_bits)) & params.q_mask()
}

/// Round and decode: converts noisy value to plaintext
/// noisy = e + Δ·μ → μ mod p
#[inline]
pub fn round_decode(noisy: u64, params: &LweParams, plaintext_bits: u32) -> u64 {
    let delta = params.delta(plaintext_bits);
    let rounded = noisy.wrapping_add(delta / 2) & params.q_mask();
    rounded >> (params.log_q - plaintext_bits)
}

/// Sample noise uniformly from [-bound, bound], as an element of ℤ_2^64
pub fn sample_noise(bound: u64, rng: &mut impl Rng) -> u64 {
    let b = bound.min(i64::MAX as u64) as i64;
    rng.random_range(-b..=b) as u64
}

/// Secret vector s ∈ ℤ_q^n
pub fn sample_secret(params: &LweParams, rng: &mut impl Rng) -> Vec<u64> {
    (0..params.n)
        .map(|_| rng.random::<u64>() & params.q_mask())
        .collect()
}

// ============================================================================
// Regev encryption scheme
// ============================================================================

/// Secret key
pub struct SecretKey<'a> {
    pub s: &'a [u64],
}

/// Encrypt under a given public row: c = aᵀs + e + Δμ mod q
pub fn encrypt(
    params: &LweParams,
    plaintext_bits: u32,
    a: &[u64],
    sk: &SecretKey,
    msg: i64,
    rng: &mut impl Rng,
) -> u64 {
    let e = sample_noise(params.noise_bound, rng);
    dot_product(a, sk.s)
        .wrapping_add(e)
        .wrapping_add(encode(msg, params, plaintext_bits))
        & params.q_mask()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ciphertext<'a> {
        a: &'a [u64],
        c: u64,
    }

    fn decrypt(params: &LweParams, plaintext_bits: u32, sk: &SecretKey, ct: &Ciphertext) -> u64 {
        let noisy = ct.c.wrapping_sub(dot_product(ct.a, sk.s));
        round_decode(noisy, params, plaintext_bits)
    }

    fn small_params() -> LweParams {
        LweParams {
            n: 64,
            ..LweParams::default_128bit()
        }
    }

    fn random_row(n: usize, rng: &mut impl Rng) -> Vec<u64> {
        (0..n).map(|_| rng.random()).collect()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let params = small_params();
        let mut rng = rand::rng();
        let s = sample_secret(&params, &mut rng);
        let a = random_row(params.n, &mut rng);
        let sk = SecretKey { s: &s };

        let c = encrypt(&params, 15, &a, &sk, 123, &mut rng);
        let dec = decrypt(&params, 15, &sk, &Ciphertext { a: &a, c });
        assert_eq!(dec, 123);
    }

    #[test]
    fn test_negative_messages_wrap_mod_p() {
        let params = small_params();
        let mut rng = rand::rng();
        let s = sample_secret(&params, &mut rng);
        let a = random_row(params.n, &mut rng);
        let sk = SecretKey { s: &s };

        let c = encrypt(&params, 10, &a, &sk, -3, &mut rng);
        let dec = decrypt(&params, 10, &sk, &Ciphertext { a: &a, c });
        assert_eq!(dec, (1 << 10) - 3);
    }

    #[test]
    fn test_encrypt_decrypt_homomorphic() {
        let params = small_params();
        let mut rng = rand::rng();
        let s = sample_secret(&params, &mut rng);
        let sk = SecretKey { s: &s };
        let a1 = random_row(params.n, &mut rng);
        let a2 = random_row(params.n, &mut rng);

        let c1 = encrypt(&params, 15, &a1, &sk, 100, &mut rng);
        let c2 = encrypt(&params, 15, &a2, &sk, -40, &mut rng);

        // Add the two ciphertexts component-wise
        let a: Vec<u64> = a1.iter().zip(&a2).map(|(&x, &y)| x.wrapping_add(y)).collect();
        let c = c1.wrapping_add(c2);

        assert_eq!(decrypt(&params, 15, &sk, &Ciphertext { a: &a, c }), 60);
    }

    #[test]
    fn test_round_decode_narrow_ring() {
        let params = LweParams {
            log_q: 32,
            ..small_params()
        };
        let delta = params.delta(8);
        // small positive and negative noise both round back to μ
        assert_eq!(round_decode(5 * delta + 17, &params, 8), 5);
        assert_eq!(round_decode((5 * delta).wrapping_sub(17), &params, 8), 5);
        // 0 - noise wraps around q
        assert_eq!(round_decode(0u64.wrapping_sub(3) & params.q_mask(), &params, 8), 0);
    }

    #[test]
    fn test_sample_noise_bounds() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let e = sample_noise(8, &mut rng) as i64;
            assert!((-8..=8).contains(&e));
        }
        assert_eq!(sample_noise(0, &mut rng), 0);
    }
}
