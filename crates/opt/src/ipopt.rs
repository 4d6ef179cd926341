use crate::errors::{OptError, Result};
use crate::nlp::{NlpSolution, NlpSolver, NlpStatus, SurrogateProblem};
use log::{debug, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of retries against a failing endpoint
pub const NLP_HTTP_RETRIES: usize = 3;
/// Default per-request timeout in seconds
pub const NLP_HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Serialize)]
struct WireRequest<'a> {
    surrogate_spec: SurrogateSpec<'a>,
    bounds: Vec<(f64, f64)>,
    initial_point: Vec<f64>,
    tolerances: WireTolerances,
}

/// Trained surrogates shipped to the solver so it can evaluate the
/// sub-problem on its side
#[derive(Serialize)]
struct SurrogateSpec<'a> {
    objective: &'a socbox_gp::Kriging<f64>,
    constraints: &'a [socbox_gp::Kriging<f64>],
}

#[derive(Serialize)]
struct WireTolerances {
    tol: f64,
    max_iter: usize,
    con_tol: f64,
}

#[derive(Deserialize)]
struct WireResponse {
    status: NlpStatus,
    x: Vec<f64>,
    objective: f64,
    #[serde(default)]
    iterations: usize,
    #[serde(default)]
    message: Option<String>,
}

/// IPOPT NLP sub-solver reached over HTTP.
///
/// One POST per sub-problem, JSON in both directions. Transport failures
/// are retried up to `retries` times before surfacing as
/// [OptError::NlpNetwork]; an `infeasible` or `error` status from the
/// solver is a normal [NlpSolution], not an error.
pub struct IpoptHttpClient {
    endpoint: String,
    agent: ureq::Agent,
    retries: usize,
}

impl IpoptHttpClient {
    /// Builds a client for the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        IpoptHttpClient {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(NLP_HTTP_TIMEOUT_SECS))
                .build(),
            retries: NLP_HTTP_RETRIES,
        }
    }

    /// Sets the number of retries before a transport failure is fatal.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::AgentBuilder::new().timeout(timeout).build();
        self
    }

    /// The configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post(&self, request: &WireRequest) -> Result<WireResponse> {
        let mut last_err = String::new();
        for attempt in 0..=self.retries {
            if attempt > 0 {
                warn!(
                    "retrying NLP request against {} ({attempt}/{})",
                    self.endpoint, self.retries
                );
            }
            match self.agent.post(&self.endpoint).send_json(request) {
                Ok(response) => {
                    return response.into_json::<WireResponse>().map_err(|e| {
                        OptError::NlpSolver(format!("malformed NLP response: {e}"))
                    });
                }
                Err(ureq::Error::Status(code, response)) => {
                    // a well-formed error status is not worth retrying
                    let body = response.into_string().unwrap_or_default();
                    return Err(OptError::NlpSolver(format!(
                        "NLP endpoint returned HTTP {code}: {body}"
                    )));
                }
                Err(ureq::Error::Transport(t)) => {
                    last_err = t.to_string();
                }
            }
        }
        Err(OptError::NlpNetwork(format!(
            "{} after {} retries: {last_err}",
            self.endpoint, self.retries
        )))
    }
}

impl NlpSolver for IpoptHttpClient {
    fn solve(&self, problem: &SurrogateProblem) -> Result<NlpSolution> {
        let request = WireRequest {
            surrogate_spec: SurrogateSpec {
                objective: problem.objective,
                constraints: problem.constraints,
            },
            bounds: problem
                .bounds
                .outer_iter()
                .map(|row| (row[0], row[1]))
                .collect(),
            initial_point: problem.xinit.to_vec(),
            tolerances: WireTolerances {
                tol: problem.tolerances.tol,
                max_iter: problem.tolerances.max_iter,
                con_tol: problem.tolerances.con_tol,
            },
        };
        let response = self.post(&request)?;
        debug!(
            "NLP response: {:?} after {} iterations",
            response.status, response.iterations
        );
        if response.x.len() != problem.xinit.len() {
            return Err(OptError::NlpSolver(format!(
                "NLP response has {} components for {} inputs",
                response.x.len(),
                problem.xinit.len()
            )));
        }
        Ok(NlpSolution {
            status: response.status,
            x: Array1::from_vec(response.x),
            objective: response.objective,
            iterations: response.iterations,
            message: response.message,
        })
    }

    /// Liveness probe: a GET against the endpoint path.
    fn probe(&self) -> Result<()> {
        self.agent
            .get(&self.endpoint)
            .call()
            .map_err(|e| OptError::NlpNetwork(format!("{}: {e}", self.endpoint)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::NlpTolerances;
    use linfa::prelude::*;
    use ndarray::{array, Array2};
    use socbox_gp::{Kriging, RegrPoly};

    #[test]
    fn test_response_parsing() {
        let json = r#"{"status": "ok", "x": [0.2, 0.3], "objective": -1.5, "iterations": 12}"#;
        let response: WireResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, NlpStatus::Ok);
        assert_eq!(response.x, vec![0.2, 0.3]);
        assert!(response.message.is_none());

        let json = r#"{"status": "error", "x": [], "objective": 0.0, "message": "restoration failed"}"#;
        let response: WireResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, NlpStatus::Error);
        assert_eq!(response.message.as_deref(), Some("restoration failed"));
    }

    #[test]
    fn test_unreachable_endpoint_is_fatal() {
        // nothing listens on this port
        let client = IpoptHttpClient::new("http://127.0.0.1:9")
            .retries(1)
            .timeout(Duration::from_millis(200));
        assert!(matches!(client.probe(), Err(OptError::NlpNetwork(_))));

        let xt = Array2::from_shape_vec((5, 1), vec![0., 0.25, 0.5, 0.75, 1.]).unwrap();
        let yt = xt.column(0).mapv(|v: f64| v * v);
        let model = Kriging::params(RegrPoly::Poly0)
            .fit(&Dataset::new(xt, yt))
            .unwrap();
        let problem = SurrogateProblem {
            objective: &model,
            constraints: &[],
            bounds: array![[0., 1.]],
            xinit: array![0.5],
            tolerances: NlpTolerances {
                tol: 1e-6,
                max_iter: 100,
                con_tol: 1e-6,
            },
        };
        assert!(matches!(
            client.solve(&problem),
            Err(OptError::NlpNetwork(_))
        ));
    }
}
