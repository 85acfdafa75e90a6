use std::collections::HashMap;

use futures_util::future::LocalBoxFuture;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

/// Collapses repeated query parameters (`?sort=a&sort=b`, `?sort[]=a`) to
/// their last value so handlers never receive a list where they expect a
/// scalar. The full lists are kept in `PollutedQuery`.
pub struct ParameterPollution;

fn base_key(key: &str) -> &str {
    key.strip_suffix("[]").unwrap_or(key)
}

/// Returns the collapsed pairs (first-occurrence order, last value) and every
/// key that occurred more than once with all of its values.
pub fn collapse(pairs: &[(String, String)]) -> (Vec<(String, String)>, HashMap<String, Vec<String>>) {
    let mut order: Vec<&str> = Vec::new();
    let mut values: HashMap<&str, Vec<&str>> = HashMap::new();
    for (key, value) in pairs {
        let key = base_key(key);
        let entry = values.entry(key).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push(value);
    }

    let mut collapsed = Vec::with_capacity(order.len());
    let mut polluted = HashMap::new();
    for key in order {
        let all = &values[key];
        if let Some(last) = all.last() {
            collapsed.push((key.to_string(), last.to_string()));
        }
        if all.len() > 1 {
            polluted.insert(key.to_string(), all.iter().map(|v| v.to_string()).collect());
        }
    }
    (collapsed, polluted)
}

impl Stage for ParameterPollution {
    fn name(&self) -> &'static str {
        "hpp"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        let (collapsed, polluted) = collapse(exchange.query());
        if collapsed.as_slice() != exchange.query() {
            *exchange.query_mut() = collapsed;
        }
        if !polluted.is_empty() {
            log::debug!(
                "request {} collapsed repeated query keys: {:?}",
                exchange.request_id(),
                polluted.keys().collect::<Vec<_>>()
            );
            exchange.polluted_mut().extend(polluted);
        }
        Box::pin(async { Ok(Flow::Continue) })
    }
}
