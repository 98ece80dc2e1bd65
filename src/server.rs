use rand::Rng;
use rayon::prelude::*;
use tracing::info;

use crate::{
    client::SimplePir,
    database::PlaintextMatrix,
    error::{Result, SearchError},
    modulus::unwrap_residue,
    params::LweParams,
    pir::{Answer, ClientHint, DbInfo, EngineHint, HintAnswer, HintQuery, LweMatrix, Query},
    pir_trait::PirServer,
    regev::dot_product,
};

/// Reference engine server state
pub struct SimplePirServer {
    /// Database entries as centred signed values, stored as wrapping u64
    lifted: Vec<u64>,
    a: LweMatrix,
    hint_c: ClientHint,
    info: DbInfo,
    engine_hint: EngineHint,
}

/// Residues in [0, p) → centred representatives, embedded in ℤ_2^64
fn lift(db: &PlaintextMatrix) -> Vec<u64> {
    let p = db.modulus();
    db.data
        .iter()
        .map(|&v| unwrap_residue(v % p, p).unwrap_or_default() as u64)
        .collect()
}

impl SimplePirServer {
    /// Preprocess a database.
    /// Generates a seed, derives A from it using ChaCha20, and computes
    /// hint_c = DB · A.
    pub fn new(db: PlaintextMatrix, params: &LweParams, rng: &mut impl Rng) -> Result<Self> {
        params.validate()?;
        if db.plaintext_bits == 0 || db.plaintext_bits >= params.log_q {
            return Err(SearchError::InvalidParams(format!(
                "plaintext width {} must be in 1..{}",
                db.plaintext_bits, params.log_q
            )));
        }
        if db.data.len() != db.rows * db.cols {
            return Err(SearchError::MalformedMessage {
                what: "database matrix",
                expected: db.rows * db.cols,
                actual: db.data.len(),
            });
        }

        let matrix_seed = LweMatrix::generate_seed(rng);
        let a = LweMatrix::from_seed(&matrix_seed, db.cols, params.n);
        let info = DbInfo {
            rows: db.rows,
            cols: db.cols,
            plaintext_bits: db.plaintext_bits,
            params: *params,
        };

        let mut server = Self {
            lifted: lift(&db),
            a,
            hint_c: ClientHint {
                data: Vec::new(),
                rows: db.rows,
                cols: params.n,
            },
            info,
            engine_hint: EngineHint { matrix_seed, info },
        };
        server.hint_c = server.compute_hint();
        info!(
            "server preprocessing done: {} x {} database, hint is {} x {}",
            db.rows, db.cols, server.hint_c.rows, server.hint_c.cols
        );
        Ok(server)
    }

    /// Setup data to send to every client
    pub fn engine_hint(&self) -> &EngineHint {
        &self.engine_hint
    }

    /// Matrix multiplication: DB · A
    /// (db.rows × db.cols) · (db.cols × n) → (db.rows × n)
    pub fn compute_hint(&self) -> ClientHint {
        let rows = self.info.rows;
        let cols = self.a.cols; // n
        let inner = self.info.cols; // M
        let mask = self.info.params.q_mask();

        let mut data = vec![0u64; rows * cols];
        data.par_chunks_mut(cols).enumerate().for_each(|(i, out)| {
            for k in 0..inner {
                // hint_c[i,:] += db[i,k] * A[k,:]
                let db_val = self.lifted[i * inner + k];
                if db_val == 0 {
                    continue;
                }
                for (acc, &a_val) in out.iter_mut().zip(self.a.row(k)) {
                    *acc = acc.wrapping_add(db_val.wrapping_mul(a_val));
                }
            }
            for acc in out.iter_mut() {
                *acc &= mask;
            }
        });

        ClientHint { data, rows, cols }
    }

    /// Answer: compute DB · query
    pub fn answer(&self, query: &Query) -> Result<Answer> {
        let cols = self.info.cols;
        if query.0.len() != cols {
            return Err(SearchError::MalformedMessage {
                what: "query",
                expected: cols,
                actual: query.0.len(),
            });
        }
        let mask = self.info.params.q_mask();
        let ans = self
            .lifted
            .par_chunks(cols)
            .map(|row| dot_product(row, &query.0) & mask)
            .collect();
        Ok(Answer(ans))
    }
}

impl PirServer for SimplePirServer {
    type Protocol = SimplePir;

    fn setup(
        db: PlaintextMatrix,
        params: &LweParams,
        rng: &mut impl Rng,
    ) -> Result<(Self, EngineHint)> {
        let server = SimplePirServer::new(db, params, rng)?;
        let hint = server.engine_hint.clone();
        Ok((server, hint))
    }

    fn hint_answer(&self, query: &HintQuery) -> Result<HintAnswer> {
        Ok(HintAnswer {
            round: query.round,
            hint_c: self.hint_c.clone(),
        })
    }

    fn answer(&self, query: &Query) -> Result<Answer> {
        self.answer(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> LweParams {
        LweParams {
            n: 2,
            ..LweParams::default_128bit()
        }
    }

    /// Build a plaintext matrix from small signed entries
    fn matrix(signed: &[i64], rows: usize, cols: usize) -> PlaintextMatrix {
        let plaintext_bits = 8;
        PlaintextMatrix {
            data: signed
                .iter()
                .map(|&v| v.rem_euclid(1 << plaintext_bits) as u64)
                .collect(),
            rows,
            cols,
            plaintext_bits,
        }
    }

    /// Helper to create a server with a specific A matrix (for testing)
    fn test_server_with_matrix(db: PlaintextMatrix, a: LweMatrix) -> SimplePirServer {
        let params = LweParams {
            n: a.cols,
            ..test_params()
        };
        let info = DbInfo {
            rows: db.rows,
            cols: db.cols,
            plaintext_bits: db.plaintext_bits,
            params,
        };
        SimplePirServer {
            lifted: lift(&db),
            hint_c: ClientHint {
                data: Vec::new(),
                rows: db.rows,
                cols: a.cols,
            },
            a,
            info,
            engine_hint: EngineHint {
                matrix_seed: [0u8; 32], // dummy seed for tests
                info,
            },
        }
    }

    #[test]
    fn test_compute_hint_small_matrix() {
        // DB = [[1, 2],
        //       [3, 4]]
        let db = matrix(&[1, 2, 3, 4], 2, 2);
        // A = [[5, 6],
        //      [7, 8]]
        let a = LweMatrix {
            data: vec![5, 6, 7, 8],
            rows: 2,
            cols: 2,
        };

        let server = test_server_with_matrix(db, a);
        let hint = server.compute_hint();

        // hint_c = DB · A
        // [[1, 2],    [[5, 6],     [[1*5+2*7, 1*6+2*8],     [[19, 22],
        //  [3, 4]]  ·  [7, 8]]  =   [3*5+4*7, 3*6+4*8]]  =   [43, 50]]
        assert_eq!(hint.rows, 2);
        assert_eq!(hint.cols, 2);
        assert_eq!(hint.data, vec![19, 22, 43, 50]);
    }

    #[test]
    fn test_compute_hint_uses_signed_entries() {
        // DB = [[-1, 2]] lifts to [2^64 - 1, 2]; with A = I the hint is DB itself
        let db = matrix(&[-1, 2], 1, 2);
        let a = LweMatrix {
            data: vec![1, 0, 0, 1],
            rows: 2,
            cols: 2,
        };

        let server = test_server_with_matrix(db, a);
        let hint = server.compute_hint();
        assert_eq!(hint.data, vec![u64::MAX, 2]);
    }

    #[test]
    fn test_compute_hint_rectangular() {
        // DB: 2×2, A: 2×3 → hint_c: 2×3
        let db = matrix(&[1, 2, 3, 4], 2, 2);
        let a = LweMatrix {
            data: vec![1, 2, 3, 4, 5, 6],
            rows: 2,
            cols: 3,
        };

        let server = test_server_with_matrix(db, a);
        let hint = server.compute_hint();

        // [[1, 2],    [[1, 2, 3],     [[9, 12, 15],
        //  [3, 4]]  ·  [4, 5, 6]]  =   [19, 26, 33]]
        assert_eq!(hint.rows, 2);
        assert_eq!(hint.cols, 3);
        assert_eq!(hint.data, vec![9, 12, 15, 19, 26, 33]);
    }

    #[test]
    fn test_answer_unit_vector_selects_column() {
        //        col0  col1
        // row 0:  10    20
        // row 1:  11    21
        // row 2:  30   -40
        let db = matrix(&[10, 20, 11, 21, 30, -40], 3, 2);
        let a = LweMatrix {
            data: vec![0; 4],
            rows: 2,
            cols: 2,
        };
        let server = test_server_with_matrix(db, a);

        // NOTE: this query is in plaintext.
        // The real protocol hides it under encryption.
        let answer = server.answer(&Query(vec![0, 1])).unwrap();
        assert_eq!(answer.0, vec![20, 21, (-40i64) as u64]);
    }

    #[test]
    fn test_answer_rejects_wrong_length() {
        let db = matrix(&[1, 2, 3, 4], 2, 2);
        let a = LweMatrix {
            data: vec![0; 4],
            rows: 2,
            cols: 2,
        };
        let server = test_server_with_matrix(db, a);
        assert!(matches!(
            server.answer(&Query(vec![1, 2, 3])),
            Err(SearchError::MalformedMessage {
                expected: 2,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_setup_rejects_inconsistent_matrix() {
        let mut rng = rand::rng();
        let db = PlaintextMatrix {
            data: vec![0; 5],
            rows: 2,
            cols: 3,
            plaintext_bits: 8,
        };
        assert!(SimplePirServer::new(db, &test_params(), &mut rng).is_err());

        let db = PlaintextMatrix {
            data: vec![0; 6],
            rows: 2,
            cols: 3,
            plaintext_bits: 64,
        };
        assert!(SimplePirServer::new(db, &test_params(), &mut rng).is_err());
    }

    #[test]
    fn test_hint_answer_echoes_round() {
        let mut rng = rand::rng();
        let db = matrix(&[1, 2, 3, 4], 2, 2);
        let (server, setup) = SimplePirServer::setup(db, &test_params(), &mut rng).unwrap();
        assert_eq!(setup.info.rows, 2);

        let answer = server.hint_answer(&HintQuery { round: 7 }).unwrap();
        assert_eq!(answer.round, 7);
        assert_eq!(answer.hint_c, server.hint_c);
        // hint matches A regenerated from the published seed
        let a = LweMatrix::from_seed(&setup.matrix_seed, 2, 2);
        assert_eq!(server.a, a);
    }
}
