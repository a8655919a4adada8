//! # Writer Factory
//!
//! Routing table from (record kind, integration) to a writer, assembled once
//! at startup from host-registered adapters. Lookups for pairs nobody
//! registered return a [`NoopWriter`], so the orchestrator never special
//! cases "not configured".

use crate::policy::{CreditNotePolicy, CustomerPolicy, InvoicePolicy, PaymentPolicy, RecordPolicy};
use crate::{LedgerAdapter, NoopWriter, ObjectWriter, RecordWriter, WriterContext};
use core_ledger::{
    CreditNote, Customer, IntegrationType, Invoice, LedgerRecord, Payment, RecordKind,
    WritableRecord,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

type WriterKey = (RecordKind, IntegrationType);

pub struct WriterFactory {
    writers: HashMap<WriterKey, Arc<dyn ObjectWriter>>,
}

impl WriterFactory {
    pub fn builder(ctx: WriterContext) -> WriterFactoryBuilder {
        WriterFactoryBuilder {
            ctx,
            writers: HashMap::new(),
        }
    }

    /// A factory with nothing registered; every lookup is a no-op writer.
    pub fn empty() -> Self {
        Self {
            writers: HashMap::new(),
        }
    }

    /// The writer for `kind` in the tenant's connected integration, if any.
    pub fn get(
        &self,
        kind: RecordKind,
        integration: Option<IntegrationType>,
    ) -> Arc<dyn ObjectWriter> {
        integration
            .and_then(|integration| self.writers.get(&(kind, integration)))
            .cloned()
            .unwrap_or_else(|| Arc::new(NoopWriter::new(kind)))
    }

    pub fn for_record(
        &self,
        record: &LedgerRecord,
        integration: Option<IntegrationType>,
    ) -> Arc<dyn ObjectWriter> {
        self.get(record.kind(), integration)
    }

    pub fn is_configured(&self, kind: RecordKind, integration: IntegrationType) -> bool {
        self.writers.contains_key(&(kind, integration))
    }

    /// Integrations with at least one registered writer.
    pub fn integrations(&self) -> Vec<IntegrationType> {
        self.writers
            .keys()
            .map(|(_, integration)| *integration)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl fmt::Debug for WriterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.writers.keys().collect();
        keys.sort();
        f.debug_struct("WriterFactory")
            .field("writers", &keys)
            .finish()
    }
}

pub struct WriterFactoryBuilder {
    ctx: WriterContext,
    writers: HashMap<WriterKey, Arc<dyn ObjectWriter>>,
}

impl WriterFactoryBuilder {
    /// Register the adapter for one record kind. A second registration for
    /// the same pair replaces the first.
    pub fn register<P: RecordPolicy>(
        mut self,
        integration: IntegrationType,
        adapter: Arc<dyn LedgerAdapter<P::Record>>,
    ) -> Self {
        let writer = RecordWriter::<P>::new(integration, adapter, self.ctx.clone());
        if self
            .writers
            .insert((P::KIND, integration), Arc::new(writer))
            .is_some()
        {
            warn!(kind = P::KIND.as_str(), %integration, "Replacing registered writer");
        }
        self
    }

    pub fn customers(
        self,
        integration: IntegrationType,
        adapter: Arc<dyn LedgerAdapter<Customer>>,
    ) -> Self {
        self.register::<CustomerPolicy>(integration, adapter)
    }

    pub fn invoices(
        self,
        integration: IntegrationType,
        adapter: Arc<dyn LedgerAdapter<Invoice>>,
    ) -> Self {
        self.register::<InvoicePolicy>(integration, adapter)
    }

    pub fn credit_notes(
        self,
        integration: IntegrationType,
        adapter: Arc<dyn LedgerAdapter<CreditNote>>,
    ) -> Self {
        self.register::<CreditNotePolicy>(integration, adapter)
    }

    pub fn payments(
        self,
        integration: IntegrationType,
        adapter: Arc<dyn LedgerAdapter<Payment>>,
    ) -> Self {
        self.register::<PaymentPolicy>(integration, adapter)
    }

    /// Register one adapter that handles every record kind.
    pub fn integration<A>(self, integration: IntegrationType, adapter: Arc<A>) -> Self
    where
        A: LedgerAdapter<Customer>
            + LedgerAdapter<Invoice>
            + LedgerAdapter<CreditNote>
            + LedgerAdapter<Payment>
            + 'static,
    {
        self.customers(integration, adapter.clone())
            .invoices(integration, adapter.clone())
            .credit_notes(integration, adapter.clone())
            .payments(integration, adapter)
    }

    pub fn build(self) -> WriterFactory {
        info!(writers = self.writers.len(), "Writer factory built");
        WriterFactory {
            writers: self.writers,
        }
    }
}
