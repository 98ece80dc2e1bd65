use std::time::Duration;

/// Column names of the performance CSV
pub const PERF_HEADER: [&str; 10] = [
    "clientHintQueryTime",
    "serverHintAnswerTime",
    "clientHintApplyTime",
    "clientQueryProcessingTime",
    "serverComputeTime",
    "clientReconTime",
    "hintQuerySize",
    "hintAnsSize",
    "querySize",
    "ansSize",
];

/// Timings and message sizes of one query round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryPerf {
    pub client_hint_query: Duration,
    pub server_hint_answer: Duration,
    pub client_hint_apply: Duration,
    pub client_query: Duration,
    pub server_answer: Duration,
    pub client_reconstruct: Duration,
    pub hint_query_bytes: usize,
    pub hint_answer_bytes: usize,
    pub query_bytes: usize,
    pub answer_bytes: usize,
}

impl QueryPerf {
    /// Online communication (query + answer)
    pub fn online_bytes(&self) -> usize {
        self.query_bytes + self.answer_bytes
    }

    /// One CSV record, times in whole milliseconds, sizes in bytes
    pub fn to_record(&self) -> Vec<String> {
        let times = [
            self.client_hint_query,
            self.server_hint_answer,
            self.client_hint_apply,
            self.client_query,
            self.server_answer,
            self.client_reconstruct,
        ];
        let sizes = [
            self.hint_query_bytes,
            self.hint_answer_bytes,
            self.query_bytes,
            self.answer_bytes,
        ];
        times
            .iter()
            .map(|t| t.as_millis().to_string())
            .chain(sizes.iter().map(|s| s.to_string()))
            .collect()
    }
}
