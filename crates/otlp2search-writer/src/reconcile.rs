//! Bulk response reconciliation
//!
//! Walks the backend's per-item outcomes alongside the ledger produced by the
//! assembler. Failed span writes are collected for retry; failed service
//! writes are only reported. Confirmed service writes are the single place
//! the dedup cache is populated.

use metrics::counter;

use crate::assembler::{BulkOperation, BulkRecord, OperationKind};
use crate::cache::ServiceCache;
use crate::client::BulkItemResponse;
use crate::error::WriteError;

/// Default highest per-item status that still counts as stored
pub const DEFAULT_MAX_SUCCESS_STATUS: u16 = 201;

#[derive(Debug)]
pub struct Reconciliation<'a, R> {
    /// Records whose span write was refused, in ledger order
    pub failed: Vec<&'a R>,
    pub accepted_spans: usize,
    pub failed_spans: usize,
    pub errors: Vec<WriteError>,
}

pub struct Reconciler<'a> {
    pub service_cache: &'a dyn ServiceCache,
    pub max_success_status: u16,
    /// Metrics label
    pub exporter: &'a str,
}

impl Reconciler<'_> {
    /// Fails with [`WriteError::ResponseMismatch`] when the response does not
    /// have exactly one item per ledger entry; nothing is classified then.
    pub fn reconcile<'r, R: BulkRecord>(
        &self,
        items: &[BulkItemResponse],
        ledger: &[BulkOperation<'r, R>],
    ) -> Result<Reconciliation<'r, R>, WriteError> {
        if items.len() != ledger.len() {
            return Err(WriteError::ResponseMismatch {
                expected: ledger.len(),
                actual: items.len(),
            });
        }

        let mut outcome = Reconciliation {
            failed: Vec::new(),
            accepted_spans: 0,
            failed_spans: 0,
            errors: Vec::new(),
        };

        for (item, operation) in items.iter().zip(ledger) {
            if item.status > self.max_success_status {
                outcome.errors.push(self.item_failed(item, operation));
                match operation.kind {
                    OperationKind::Span => {
                        outcome.failed.push(operation.record);
                        outcome.failed_spans += 1;
                    }
                    OperationKind::Service(_) => {
                        counter!("otlp2search.services.refused", 1, "exporter" => self.exporter.to_string());
                    }
                }
            } else {
                match operation.kind {
                    OperationKind::Span => outcome.accepted_spans += 1,
                    OperationKind::Service(key) => self.service_cache.record(key),
                }
            }
        }

        if outcome.accepted_spans > 0 {
            counter!(
                "otlp2search.spans.accepted",
                outcome.accepted_spans as u64,
                "exporter" => self.exporter.to_string()
            );
        }
        if outcome.failed_spans > 0 {
            counter!(
                "otlp2search.spans.refused",
                outcome.failed_spans as u64,
                "exporter" => self.exporter.to_string()
            );
            tracing::warn!(
                exporter = self.exporter,
                accepted = outcome.accepted_spans,
                "failed to write {} spans",
                outcome.failed_spans
            );
        }

        Ok(outcome)
    }

    fn item_failed<R: BulkRecord>(
        &self,
        item: &BulkItemResponse,
        operation: &BulkOperation<'_, R>,
    ) -> WriteError {
        let error = item.error.clone().unwrap_or_default();
        let cause = error.caused_by.unwrap_or_default();

        tracing::error!(
            result = %item.result,
            status = item.status,
            index = %item.index,
            service = operation.is_service(),
            "error.reason" = %error.reason,
            "error.type" = %error.error_type,
            "error.cause.type" = %cause.error_type,
            "error.cause.reason" = %cause.reason,
            "Part of the bulk request failed"
        );

        WriteError::ItemFailed {
            status: item.status,
            result: item.result.clone(),
            reason: error.reason,
            error_type: error.error_type,
            cause_type: cause.error_type,
            cause_reason: cause.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::tests::TestRecord;
    use crate::cache::{MokaServiceCache, ServiceKey};
    use crate::client::{BulkItemError, ErrorCause};

    fn reconciler(cache: &MokaServiceCache) -> Reconciler<'_> {
        Reconciler {
            service_cache: cache,
            max_success_status: DEFAULT_MAX_SUCCESS_STATUS,
            exporter: "elasticsearch",
        }
    }

    fn span_op(record: &TestRecord) -> BulkOperation<'_, TestRecord> {
        BulkOperation {
            record,
            kind: OperationKind::Span,
        }
    }

    fn service_op(record: &TestRecord) -> BulkOperation<'_, TestRecord> {
        BulkOperation {
            record,
            kind: OperationKind::Service(ServiceKey::new(&record.service, &record.operation)),
        }
    }

    fn statuses(codes: &[u16]) -> Vec<BulkItemResponse> {
        codes.iter().map(|c| BulkItemResponse::with_status(*c)).collect()
    }

    struct Case {
        name: &'static str,
        // (is_service, status)
        items: &'static [(bool, u16)],
        accepted: usize,
        failed: usize,
    }

    #[test]
    fn test_accounting_table() {
        let cases = [
            Case {
                name: "all spans and services stored",
                items: &[(true, 200), (true, 200), (false, 200), (false, 201)],
                accepted: 2,
                failed: 0,
            },
            Case {
                name: "one service refused",
                items: &[(true, 200), (true, 500), (false, 200), (false, 200)],
                accepted: 2,
                failed: 0,
            },
            Case {
                name: "all services refused",
                items: &[(true, 500), (true, 500), (false, 200), (false, 200)],
                accepted: 2,
                failed: 0,
            },
            Case {
                name: "one span and one service refused",
                items: &[(true, 200), (true, 500), (false, 200), (false, 500)],
                accepted: 1,
                failed: 1,
            },
            Case {
                name: "all spans refused",
                items: &[(true, 200), (true, 500), (false, 500), (false, 409)],
                accepted: 0,
                failed: 2,
            },
        ];

        for case in cases {
            let cache = MokaServiceCache::default();
            let records: Vec<TestRecord> = (0..case.items.len())
                .map(|i| TestRecord::new(&i.to_string(), "svc", &format!("op-{}", i)))
                .collect();
            let ledger: Vec<_> = case
                .items
                .iter()
                .zip(&records)
                .map(|((is_service, _), record)| {
                    if *is_service {
                        service_op(record)
                    } else {
                        span_op(record)
                    }
                })
                .collect();
            let items: Vec<_> = case
                .items
                .iter()
                .map(|(_, status)| BulkItemResponse::with_status(*status))
                .collect();

            let outcome = reconciler(&cache).reconcile(&items, &ledger).unwrap();
            assert_eq!(outcome.accepted_spans, case.accepted, "{}", case.name);
            assert_eq!(outcome.failed_spans, case.failed, "{}", case.name);
            assert_eq!(outcome.failed.len(), case.failed, "{}", case.name);

            let refused = case.items.iter().filter(|(_, s)| *s > 201).count();
            assert_eq!(outcome.errors.len(), refused, "{}", case.name);
        }
    }

    #[test]
    fn test_only_confirmed_services_are_cached() {
        let cache = MokaServiceCache::default();
        let stored = TestRecord::new("a", "checkout", "charge");
        let refused = TestRecord::new("b", "checkout", "refund");
        let ledger = vec![
            span_op(&stored),
            service_op(&stored),
            span_op(&refused),
            service_op(&refused),
        ];

        reconciler(&cache)
            .reconcile(&statuses(&[201, 200, 200, 503]), &ledger)
            .unwrap();

        assert!(cache.contains(&ServiceKey::new("checkout", "charge")));
        assert!(!cache.contains(&ServiceKey::new("checkout", "refund")));
    }

    #[test]
    fn test_failed_records_in_ledger_order() {
        let cache = MokaServiceCache::default();
        let records: Vec<TestRecord> = ["a", "b", "c"]
            .iter()
            .map(|id| TestRecord::new(id, "svc", "op"))
            .collect();
        let ledger: Vec<_> = records.iter().map(span_op).collect();

        let outcome = reconciler(&cache)
            .reconcile(&statuses(&[500, 200, 429]), &ledger)
            .unwrap();
        let failed: Vec<&str> = outcome.failed.iter().map(|r| r.span_id.as_str()).collect();
        assert_eq!(failed, vec!["a", "c"]);
    }

    #[test]
    fn test_item_failure_details() {
        let cache = MokaServiceCache::default();
        let record = TestRecord::new("a", "svc", "op");
        let ledger = vec![span_op(&record)];
        let items = vec![BulkItemResponse {
            index: "jaeger-span-2024-01-15".to_string(),
            result: "noop".to_string(),
            status: 400,
            error: Some(BulkItemError {
                error_type: "mapper_parsing_exception".to_string(),
                reason: "failed to parse field [tag]".to_string(),
                caused_by: Some(ErrorCause {
                    error_type: "illegal_argument_exception".to_string(),
                    reason: "bad value".to_string(),
                }),
            }),
            ..Default::default()
        }];

        let outcome = reconciler(&cache).reconcile(&items, &ledger).unwrap();
        match &outcome.errors[0] {
            WriteError::ItemFailed {
                status,
                result,
                reason,
                error_type,
                cause_type,
                cause_reason,
            } => {
                assert_eq!(*status, 400);
                assert_eq!(result, "noop");
                assert_eq!(reason, "failed to parse field [tag]");
                assert_eq!(error_type, "mapper_parsing_exception");
                assert_eq!(cause_type, "illegal_argument_exception");
                assert_eq!(cause_reason, "bad value");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_threshold_is_configurable() {
        let cache = MokaServiceCache::default();
        let record = TestRecord::new("a", "svc", "op");
        let ledger = vec![span_op(&record)];
        let items = statuses(&[202]);

        let strict = reconciler(&cache).reconcile(&items, &ledger).unwrap();
        assert_eq!(strict.failed_spans, 1);

        let lenient = Reconciler {
            max_success_status: 299,
            ..reconciler(&cache)
        }
        .reconcile(&items, &ledger)
        .unwrap();
        assert_eq!(lenient.failed_spans, 0);
        assert_eq!(lenient.accepted_spans, 1);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let cache = MokaServiceCache::default();
        let record = TestRecord::new("a", "svc", "op");
        let ledger = vec![span_op(&record), service_op(&record)];

        let err = reconciler(&cache)
            .reconcile(&statuses(&[200]), &ledger)
            .unwrap_err();
        assert!(matches!(
            err,
            WriteError::ResponseMismatch {
                expected: 2,
                actual: 1
            }
        ));
        // nothing was classified, so nothing was cached
        assert!(!cache.contains(&ServiceKey::new("svc", "op")));

        let err = reconciler(&cache)
            .reconcile(&statuses(&[200, 200, 200]), &ledger)
            .unwrap_err();
        assert!(matches!(err, WriteError::ResponseMismatch { actual: 3, .. }));
    }

    #[test]
    fn test_empty_ledger() {
        let cache = MokaServiceCache::default();
        let ledger: Vec<BulkOperation<'_, TestRecord>> = Vec::new();
        let outcome = reconciler(&cache).reconcile(&[], &ledger).unwrap();
        assert_eq!(outcome.accepted_spans, 0);
        assert!(outcome.failed.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
