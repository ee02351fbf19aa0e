//! Per-request render context

use std::sync::Arc;

use serde_json::Value;

use crate::exchange::{Exchange, Request};
use crate::script::CallContext;

/// Arguments accumulated along one render descent
///
/// Cheap to clone; every slot works on its own extended copy so sibling
/// branches never observe each other's arguments.
#[derive(Debug, Clone)]
pub struct RenderContext {
    exchange: Arc<Exchange>,
    args: Vec<Value>,
}

impl RenderContext {
    pub fn new(exchange: Arc<Exchange>) -> Self {
        Self {
            exchange,
            args: Vec::new(),
        }
    }

    pub fn from_request(request: Request) -> Self {
        Self::new(Arc::new(Exchange::new(request)))
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn call(&self) -> CallContext<'_> {
        CallContext::new(&self.exchange, &self.args)
    }

    /// Copy with one more argument (a loop element)
    pub fn push(&self, value: Value) -> Self {
        let mut next = self.clone();
        next.args.push(value);
        next
    }

    /// Copy extended by an argument-provider result; arrays spread
    pub fn extend(&self, provided: Value) -> Self {
        let mut next = self.clone();
        match provided {
            Value::Array(items) => next.args.extend(items),
            other => next.args.push(other),
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extension_never_touches_the_parent() {
        let base = RenderContext::from_request(Request::get("/")).with_args(vec![json!(1)]);
        let spread = base.extend(json!([2, 3]));
        let single = base.extend(json!({"a": 1}));
        let looped = spread.push(json!("x"));

        assert_eq!(base.args(), &[json!(1)]);
        assert_eq!(spread.args(), &[json!(1), json!(2), json!(3)]);
        assert_eq!(single.args().len(), 2);
        assert_eq!(looped.args().last(), Some(&json!("x")));
    }
}
