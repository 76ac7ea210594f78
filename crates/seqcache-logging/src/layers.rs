//! Custom tracing layers

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{NodeContextData, NodeContextGuard};

/// Layer that attaches the active node context to every new span
///
/// Downstream layers read it back through [`NodeContextExtension`].
#[derive(Debug, Default)]
pub struct NodeContextLayer;

impl NodeContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(node_ctx) = NodeContextGuard::current()
        {
            span.extensions_mut()
                .insert(NodeContextExtension { data: node_ctx });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::Registry;
    use tracing_subscriber::layer::SubscriberExt;

    /// Records the node id found on each new span
    struct SeenNodes(Arc<Mutex<Vec<Option<String>>>>);

    impl<S> Layer<S> for SeenNodes
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
            let node = ctx.span(id).and_then(|span| {
                span.extensions()
                    .get::<NodeContextExtension>()
                    .map(|ext| ext.data.node_id.clone())
            });
            self.0.lock().unwrap().push(node);
        }
    }

    #[test]
    fn test_spans_carry_node_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default()
            .with(NodeContextLayer::new())
            .with(SeenNodes(seen.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let _outside = tracing::info_span!("outside");
            let _guard = NodeContextGuard::new("node-a");
            let _inside = tracing::info_span!("inside");
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("node-a".to_string())]
        );
    }
}
