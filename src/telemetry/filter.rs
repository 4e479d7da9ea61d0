use std::collections::HashMap;
use std::sync::Arc;

use super::identity::IdentityExtractor;
use super::membership::{MembershipCache, MembershipError};
use crate::models::telemetry::{KeyValue, Span};
use crate::models::{ApiIdentity, TracesData};

/// Per-batch span accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub admitted: usize,
    pub dropped: usize,
}

/// Prunes trace batches down to spans of tracked APIs
///
/// Identity is decided at the outermost level where it is complete: a whole
/// resource, a whole scope, or a single span. Spans whose identity is never
/// complete are dropped.
pub struct AdmissionFilter {
    extractor: IdentityExtractor,
    membership: Arc<dyn MembershipCache>,
}

impl AdmissionFilter {
    pub fn new(extractor: IdentityExtractor, membership: Arc<dyn MembershipCache>) -> Self {
        Self {
            extractor,
            membership,
        }
    }

    /// Filter a batch in place. A lookup failure fails the whole batch.
    pub async fn filter(&self, mut batch: TracesData) -> Result<(TracesData, FilterStats), MembershipError> {
        let mut lookups = Lookups::new(self.membership.as_ref());
        let mut stats = FilterStats::default();

        for resource_spans in &mut batch.resource_spans {
            let resource_attrs: &[KeyValue] = resource_spans
                .resource
                .as_ref()
                .map(|r| r.attributes.as_slice())
                .unwrap_or_default();

            if let Some(identity) = self.extractor.extract(&[resource_attrs]) {
                let count: usize = resource_spans.scope_spans.iter().map(|s| s.spans.len()).sum();
                if lookups.exists(&identity).await? {
                    stats.admitted += count;
                } else {
                    tracing::debug!(api = %identity, spans = count, "Dropping resource of untracked API");
                    stats.dropped += count;
                    resource_spans.scope_spans.clear();
                }
                continue;
            }

            for scope_spans in &mut resource_spans.scope_spans {
                let scope_attrs: &[KeyValue] = scope_spans
                    .scope
                    .as_ref()
                    .map(|s| s.attributes.as_slice())
                    .unwrap_or_default();

                if let Some(identity) = self.extractor.extract(&[scope_attrs, resource_attrs]) {
                    let count = scope_spans.spans.len();
                    if lookups.exists(&identity).await? {
                        stats.admitted += count;
                    } else {
                        stats.dropped += count;
                        scope_spans.spans.clear();
                    }
                    continue;
                }

                let spans = std::mem::take(&mut scope_spans.spans);
                let total = spans.len();
                let mut kept: Vec<Span> = Vec::with_capacity(total);
                for span in spans {
                    let identity = self.extractor.extract(&[
                        span.attributes.as_slice(),
                        scope_attrs,
                        resource_attrs,
                    ]);
                    // Unidentifiable spans are never admitted
                    let admit = match identity {
                        Some(identity) => lookups.exists(&identity).await?,
                        None => false,
                    };
                    if admit {
                        kept.push(span);
                    }
                }
                stats.admitted += kept.len();
                stats.dropped += total - kept.len();
                scope_spans.spans = kept;
            }
        }

        Ok((batch, stats))
    }
}

/// Memoizes membership answers for the duration of one batch
struct Lookups<'a> {
    cache: &'a dyn MembershipCache,
    seen: HashMap<ApiIdentity, bool>,
}

impl<'a> Lookups<'a> {
    fn new(cache: &'a dyn MembershipCache) -> Self {
        Self {
            cache,
            seen: HashMap::new(),
        }
    }

    async fn exists(&mut self, identity: &ApiIdentity) -> Result<bool, MembershipError> {
        if let Some(known) = self.seen.get(identity) {
            return Ok(*known);
        }
        let exists = self.cache.exists(identity).await?;
        self.seen.insert(identity.clone(), exists);
        Ok(exists)
    }
}
