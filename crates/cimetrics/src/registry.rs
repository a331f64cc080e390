//! Metrics registry holding declared metrics and their current values.

use prometheus_client::{
    collector::Collector,
    encoding::{text, DescriptorEncoder, EncodeLabelValue, LabelValueEncoder},
    registry::Registry as RegistryInner,
};

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Write as _},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard},
};

use crate::{
    descriptors::{LabelSet, MetricDefinition},
    error::RegistryError,
    format::{Format, PrometheusWrapper},
    snapshot::Snapshot,
};

/// How [`Registry::apply()`] treats label sets that are present in the registry, but are missing
/// from the applied snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Keep them: values not reported by the snapshot stay at their last published level.
    #[default]
    Merge,
    /// Drop them, so that each metric holds exactly the label sets from the snapshot.
    Replace,
}

/// Declared metric together with its current values.
#[derive(Debug)]
struct MetricFamily {
    definition: MetricDefinition,
    values: RwLock<BTreeMap<LabelSet, f64>>,
}

impl MetricFamily {
    fn new(definition: MetricDefinition) -> Self {
        Self {
            definition,
            values: RwLock::default(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<LabelSet, f64>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, update: impl FnOnce(&mut BTreeMap<LabelSet, f64>)) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut values);
    }
}

/// Label value escaped for the text exposition format: `\`, `"` and line feeds are written
/// as `\\`, `\"` and `\n`.
#[derive(Debug, Clone, Copy)]
struct EscapedLabelValue<'a>(&'a str);

impl EncodeLabelValue for EscapedLabelValue<'_> {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> fmt::Result {
        let mut rest = self.0;
        while let Some(pos) = rest.find(['\\', '"', '\n']) {
            encoder.write_str(&rest[..pos])?;
            encoder.write_str(match rest.as_bytes()[pos] {
                b'\\' => r"\\",
                b'"' => r#"\""#,
                _ => r"\n",
            })?;
            rest = &rest[pos + 1..];
        }
        encoder.write_str(rest)
    }
}

/// Encodes a single family when the registry is scraped.
#[derive(Debug)]
struct FamilyCollector(Arc<MetricFamily>);

impl Collector for FamilyCollector {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> fmt::Result {
        let definition = &self.0.definition;
        let mut metric_encoder = encoder.encode_descriptor(
            definition.name(),
            definition.help(),
            None,
            definition.kind().metric_type(),
        )?;

        let values = self.0.read();
        for (labels, value) in values.iter() {
            if labels.is_empty() {
                metric_encoder.encode_gauge(value)?;
            } else {
                let pairs: Vec<_> = labels
                    .pairs()
                    .iter()
                    .map(|(name, label_value)| (name.as_str(), EscapedLabelValue(label_value)))
                    .collect();
                metric_encoder.encode_family(&pairs)?.encode_gauge(value)?;
            }
        }
        Ok(())
    }
}

/// Metrics registry.
///
/// Metrics are [declared](Self::declare()) during startup, which requires exclusive access.
/// Afterwards, the registry can be shared (e.g., wrapped in an `Arc`) between a single writer
/// setting observed values and any number of readers encoding it. Each metric is guarded
/// separately, so a reader always observes either the old or the new state of a metric,
/// but different metrics may come from different writes.
pub struct Registry {
    families: Vec<Arc<MetricFamily>>,
    index: HashMap<String, usize>,
    inner: RegistryInner,
}

impl fmt::Debug for Registry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .families
            .iter()
            .map(|family| family.definition.name())
            .collect();
        formatter
            .debug_struct("Registry")
            .field("metrics", &names)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            families: Vec::new(),
            index: HashMap::new(),
            inner: RegistryInner::default(),
        }
    }

    /// Creates a registry with the specified metrics declared.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::declare()`].
    pub fn new<I>(definitions: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = MetricDefinition>,
    {
        let mut this = Self::empty();
        for definition in definitions {
            this.declare(definition)?;
        }
        Ok(this)
    }

    /// Creates a registry with the same declared metrics as this one, but without any values.
    #[must_use]
    pub fn fresh(&self) -> Self {
        let mut this = Self::empty();
        for family in &self.families {
            this.insert(family.definition.clone());
        }
        this
    }

    /// Declares a metric. Declaring a metric with the same name and label schema again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name, but a different label schema is already declared.
    pub fn declare(&mut self, definition: MetricDefinition) -> Result<(), RegistryError> {
        if let Some(existing) = self.definition(definition.name()) {
            if existing.label_names() == definition.label_names() {
                return Ok(());
            }
            return Err(RegistryError::LabelSchemaConflict {
                name: definition.name().to_owned(),
                declared: existing.label_names().to_vec(),
                requested: definition.label_names().to_vec(),
            });
        }
        self.insert(definition);
        Ok(())
    }

    fn insert(&mut self, definition: MetricDefinition) {
        let family = Arc::new(MetricFamily::new(definition));
        self.inner
            .register_collector(Box::new(FamilyCollector(Arc::clone(&family))));
        self.index
            .insert(family.definition.name().to_owned(), self.families.len());
        self.families.push(family);
    }

    fn family(&self, name: &str) -> Option<&MetricFamily> {
        let &idx = self.index.get(name)?;
        Some(&self.families[idx])
    }

    fn checked_family(&self, name: &str, labels: &LabelSet) -> Result<&MetricFamily, RegistryError> {
        let family = self
            .family(name)
            .ok_or_else(|| RegistryError::UndeclaredMetric(name.to_owned()))?;
        family.definition.check_labels(labels)?;
        Ok(family)
    }

    /// Returns the definition of a declared metric.
    pub fn definition(&self, name: &str) -> Option<&MetricDefinition> {
        self.family(name).map(|family| &family.definition)
    }

    /// Iterates over all declared metrics in the declaration order.
    pub fn definitions(&self) -> impl Iterator<Item = &MetricDefinition> + '_ {
        self.families.iter().map(|family| &family.definition)
    }

    /// Sets the value for the specified labels, overwriting the previous value if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not declared in this registry, or if labels do not match its schema.
    pub fn set(
        &self,
        definition: &MetricDefinition,
        labels: LabelSet,
        value: f64,
    ) -> Result<(), RegistryError> {
        let family = self.checked_family(definition.name(), &labels)?;
        family.write(|values| {
            values.insert(labels, value);
        });
        Ok(())
    }

    /// Returns the current value of the metric with the specified labels.
    pub fn get(&self, metric: &str, labels: &LabelSet) -> Option<f64> {
        self.family(metric)?.read().get(labels).copied()
    }

    /// Writes all observations from `snapshot` into this registry, one metric at a time.
    ///
    /// With [`ApplyMode::Replace`], every declared metric ends up with exactly the label sets
    /// present in the snapshot (metrics absent from the snapshot are cleared).
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot contains an undeclared metric or mismatching labels.
    /// In this case, the registry is not modified.
    pub fn apply(&self, snapshot: &Snapshot, mode: ApplyMode) -> Result<(), RegistryError> {
        for name in snapshot.metric_names() {
            let values = snapshot.values(name).into_iter().flatten();
            for (labels, _) in values {
                self.checked_family(name, labels)?;
            }
        }

        for family in &self.families {
            let values = snapshot.values(family.definition.name());
            match (mode, values) {
                (ApplyMode::Merge, None) => { /* nothing to update */ }
                (ApplyMode::Merge, Some(values)) => family.write(|current| {
                    current.extend(values.iter().map(|(labels, &value)| (labels.clone(), value)));
                }),
                (ApplyMode::Replace, values) => {
                    let values = values.cloned().unwrap_or_default();
                    family.write(|current| *current = values);
                }
            }
        }
        Ok(())
    }

    /// Returns a copy of all current values.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for family in &self.families {
            let values = family.read().clone();
            snapshot.insert_values(family.definition.name(), values);
        }
        snapshot
    }

    /// Encodes all metrics in this registry using the specified format.
    ///
    /// # Errors
    ///
    /// Proxies formatting errors of the provided `writer`.
    pub fn encode<W: fmt::Write>(&self, writer: &mut W, format: Format) -> fmt::Result {
        match format {
            Format::OpenMetrics => text::encode(writer, &self.inner),
            Format::Prometheus => {
                let mut wrapper = PrometheusWrapper::new(writer);
                text::encode(&mut wrapper, &self.inner)?;
                wrapper.flush()
            }
        }
    }
}
