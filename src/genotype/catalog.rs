//! Variant catalog (one row per variant surviving the freeze filters)

use crate::storage::{column, Table};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Catalog table name inside the run directory
pub const VARIANTS_TABLE: &str = "variants";

/// Fields accepted by [`VariantCatalog::query`]
pub const VARIANT_FIELDS: &[&str] = &[
    "name",
    "chrom",
    "pos",
    "minor_allele_count",
    "minor",
    "major",
    "n_missing",
    "n_non_missing",
    "maf",
    "completion_rate",
];

/// A genetic variant with call statistics computed at freeze time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Unique identifier
    pub name: String,
    /// Chromosome
    pub chrom: String,
    /// Position
    pub pos: u64,
    /// Sum of minor allele dosages over non-missing samples
    pub minor_allele_count: f64,
    /// Minor allele
    pub minor: String,
    /// Major allele
    pub major: String,
    /// Missing calls
    pub n_missing: u64,
    /// Non-missing calls
    pub n_non_missing: u64,
}

impl Variant {
    /// Minor allele frequency, NaN when every call is missing
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn maf(&self) -> f64 {
        if self.n_non_missing == 0 {
            return f64::NAN;
        }
        self.minor_allele_count / (2.0 * self.n_non_missing as f64)
    }

    /// Fraction of non-missing calls
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completion_rate(&self) -> f64 {
        let total = self.n_missing + self.n_non_missing;
        if total == 0 {
            return f64::NAN;
        }
        self.n_non_missing as f64 / total as f64
    }
}

fn variant_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("chrom", DataType::Utf8, false),
        Field::new("pos", DataType::UInt64, false),
        Field::new("minor_allele_count", DataType::Float64, false),
        Field::new("minor", DataType::Utf8, false),
        Field::new("major", DataType::Utf8, false),
        Field::new("n_missing", DataType::UInt64, false),
        Field::new("n_non_missing", DataType::UInt64, false),
    ]))
}

/// Append-only catalog of frozen variants
///
/// Rows are inserted in batches while the genotype source freezes; the
/// catalog is then sealed and refuses any further insert.
#[derive(Debug, Clone)]
pub struct VariantCatalog {
    table: Table,
    sealed: bool,
    // name -> (batch, row)
    index: FxHashMap<String, (usize, usize)>,
}

impl Default for VariantCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl VariantCatalog {
    /// Empty, writable catalog
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Table::new(variant_schema()),
            sealed: false,
            index: FxHashMap::default(),
        }
    }

    /// Wrap a persisted table (read side). The catalog is sealed.
    ///
    /// # Errors
    /// Returns error if the table schema is not the variant schema
    pub fn from_table(table: Table) -> Result<Self> {
        let schema = variant_schema();
        let loaded = table.schema();
        let same_columns = loaded.fields().len() == schema.fields().len()
            && loaded
                .fields()
                .iter()
                .zip(schema.fields())
                .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type());
        if !same_columns {
            return Err(Error::StorageError(
                "Table does not have the variant catalog schema".to_string(),
            ));
        }
        // field metadata does not survive every Parquet writer
        let mut catalog = Self {
            table: Table::new(schema.clone()),
            sealed: false,
            index: FxHashMap::default(),
        };
        for batch in table.batches() {
            catalog.append(RecordBatch::try_new(schema.clone(), batch.columns().to_vec())?)?;
        }
        catalog.seal();
        Ok(catalog)
    }

    /// Insert a batch of variants
    ///
    /// # Errors
    /// Returns [`Error::FrozenDatabase`] once the catalog is sealed
    pub fn insert_batch(&mut self, variants: &[Variant]) -> Result<()> {
        if self.sealed {
            return Err(Error::FrozenDatabase);
        }
        if variants.is_empty() {
            return Ok(());
        }
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(variants.iter().map(|v| v.name.as_str()))),
            Arc::new(StringArray::from_iter_values(variants.iter().map(|v| v.chrom.as_str()))),
            Arc::new(UInt64Array::from_iter_values(variants.iter().map(|v| v.pos))),
            Arc::new(Float64Array::from_iter_values(
                variants.iter().map(|v| v.minor_allele_count),
            )),
            Arc::new(StringArray::from_iter_values(variants.iter().map(|v| v.minor.as_str()))),
            Arc::new(StringArray::from_iter_values(variants.iter().map(|v| v.major.as_str()))),
            Arc::new(UInt64Array::from_iter_values(variants.iter().map(|v| v.n_missing))),
            Arc::new(UInt64Array::from_iter_values(variants.iter().map(|v| v.n_non_missing))),
        ];
        self.append(RecordBatch::try_new(self.table.schema(), columns)?)
    }

    fn append(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let b = self.table.batches().len();
        let names = column::<StringArray>(&batch, "name")?.clone();
        self.table.append_batch(batch)?;
        for row in 0..names.len() {
            self.index.insert(names.value(row).to_string(), (b, row));
        }
        Ok(())
    }

    /// Refuse further inserts
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// True once sealed
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of variants
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.num_rows()
    }

    /// True when no variant was inserted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Underlying table
    #[must_use]
    pub const fn table(&self) -> &Table {
        &self.table
    }

    /// Decode every row
    ///
    /// # Errors
    /// Returns error if the stored columns cannot be read
    pub fn variants(&self) -> Result<Vec<Variant>> {
        let mut out = Vec::with_capacity(self.len());
        for batch in self.table.batches() {
            let rows = RowReader::new(batch)?;
            out.extend((0..batch.num_rows()).map(|i| rows.variant(i)));
        }
        Ok(out)
    }

    /// Find one variant by name
    ///
    /// # Errors
    /// Returns a lookup error if the name is not in the catalog
    pub fn get(&self, name: &str) -> Result<Variant> {
        let &(b, row) = self
            .index
            .get(name)
            .ok_or_else(|| Error::unknown_variant(name))?;
        let batch = &self.table.batches()[b];
        Ok(RowReader::new(batch)?.variant(row))
    }

    /// True if the catalog holds `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Projection over stored and derived fields (`maf`, `completion_rate`)
    ///
    /// `None` selects every field.
    ///
    /// # Errors
    /// Returns [`Error::UnknownField`] naming the first unknown field and
    /// [`Error::InvalidInput`] for an empty field list
    pub fn query(&self, fields: Option<&[&str]>) -> Result<RecordBatch> {
        let fields: Vec<&str> = fields.map_or_else(|| VARIANT_FIELDS.to_vec(), <[&str]>::to_vec);
        if fields.is_empty() {
            return Err(Error::InvalidInput(
                "Variant query needs at least one field".to_string(),
            ));
        }
        if let Some(bad) = fields.iter().find(|f| !VARIANT_FIELDS.contains(f)) {
            return Err(Error::UnknownField {
                field: (*bad).to_string(),
                available: VARIANT_FIELDS.join(", "),
            });
        }

        let stored = self.table.concat()?;
        let derived = |f: fn(&Variant) -> f64| -> Result<ArrayRef> {
            let values: Vec<f64> = self.variants()?.iter().map(f).collect();
            Ok(Arc::new(Float64Array::from(values)))
        };

        let mut schema_fields = Vec::with_capacity(fields.len());
        let mut columns = Vec::with_capacity(fields.len());
        for field in fields {
            let array = match field {
                "maf" => derived(Variant::maf)?,
                "completion_rate" => derived(Variant::completion_rate)?,
                name => stored
                    .column_by_name(name)
                    .cloned()
                    .ok_or_else(|| Error::StorageError(format!("Missing column '{name}'")))?,
            };
            schema_fields.push(Field::new(field, array.data_type().clone(), array.null_count() > 0));
            columns.push(array);
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(schema_fields)), columns)?)
    }
}

/// Typed column views of one catalog batch
struct RowReader<'a> {
    name: &'a StringArray,
    chrom: &'a StringArray,
    pos: &'a UInt64Array,
    mac: &'a Float64Array,
    minor: &'a StringArray,
    major: &'a StringArray,
    n_missing: &'a UInt64Array,
    n_non_missing: &'a UInt64Array,
}

impl<'a> RowReader<'a> {
    fn new(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            name: column(batch, "name")?,
            chrom: column(batch, "chrom")?,
            pos: column(batch, "pos")?,
            mac: column(batch, "minor_allele_count")?,
            minor: column(batch, "minor")?,
            major: column(batch, "major")?,
            n_missing: column(batch, "n_missing")?,
            n_non_missing: column(batch, "n_non_missing")?,
        })
    }

    fn variant(&self, i: usize) -> Variant {
        Variant {
            name: self.name.value(i).to_string(),
            chrom: self.chrom.value(i).to_string(),
            pos: self.pos.value(i),
            minor_allele_count: self.mac.value(i),
            minor: self.minor.value(i).to_string(),
            major: self.major.value(i).to_string(),
            n_missing: self.n_missing.value(i),
            n_non_missing: self.n_non_missing.value(i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(name: &str, mac: f64, n_missing: u64, n_non_missing: u64) -> Variant {
        Variant {
            name: name.to_string(),
            chrom: "1".to_string(),
            pos: 100,
            minor_allele_count: mac,
            minor: "T".to_string(),
            major: "C".to_string(),
            n_missing,
            n_non_missing,
        }
    }

    #[test]
    fn test_derived_statistics() {
        let v = variant("rs1", 3.0, 2, 10);
        assert!((v.maf() - 0.15).abs() < 1e-12);
        assert!((v.completion_rate() - 10.0 / 12.0).abs() < 1e-12);
        assert!(variant("rs2", 0.0, 4, 0).maf().is_nan());
    }

    #[test]
    fn test_sealed_catalog_rejects_inserts() {
        let mut catalog = VariantCatalog::new();
        catalog.insert_batch(&[variant("rs1", 1.0, 0, 5)]).unwrap();
        catalog.seal();
        let err = catalog.insert_batch(&[variant("rs2", 1.0, 0, 5)]).unwrap_err();
        assert!(matches!(err, Error::FrozenDatabase));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_query_projection_with_derived_fields() {
        let mut catalog = VariantCatalog::new();
        catalog
            .insert_batch(&[variant("rs1", 1.0, 0, 5), variant("rs2", 2.0, 1, 4)])
            .unwrap();

        let batch = catalog.query(Some(&["name", "maf"])).unwrap();
        assert_eq!(batch.num_columns(), 2);
        let maf = column::<Float64Array>(&batch, "maf").unwrap();
        assert!((maf.value(0) - 0.1).abs() < 1e-12);
        assert!((maf.value(1) - 0.25).abs() < 1e-12);

        let all = catalog.query(None).unwrap();
        assert_eq!(all.num_columns(), VARIANT_FIELDS.len());
    }

    #[test]
    fn test_query_unknown_field_named_in_error() {
        let catalog = VariantCatalog::new();
        let err = catalog.query(Some(&["name", "rsid"])).unwrap_err();
        assert!(matches!(err, Error::UnknownField { ref field, .. } if field == "rsid"));
    }

    #[test]
    fn test_variants_decode_round_trip() {
        let mut catalog = VariantCatalog::new();
        let input = vec![variant("rs1", 1.0, 0, 5), variant("rs2", 2.0, 1, 4)];
        catalog.insert_batch(&input[..1]).unwrap();
        catalog.insert_batch(&input[1..]).unwrap();
        assert_eq!(catalog.variants().unwrap(), input);
        assert_eq!(catalog.get("rs2").unwrap().n_missing, 1);
        assert!(catalog.get("rs9").is_err());
    }

    #[test]
    fn test_get_resolves_rows_across_batches() {
        let mut catalog = VariantCatalog::new();
        let input: Vec<Variant> = (0..5).map(|i| variant(&format!("rs{i}"), f64::from(i), 0, 5)).collect();
        catalog.insert_batch(&input[..2]).unwrap();
        catalog.insert_batch(&input[2..]).unwrap();
        for v in &input {
            assert_eq!(&catalog.get(&v.name).unwrap(), v);
            assert!(catalog.contains(&v.name));
        }
        assert!(!catalog.contains("rs5"));
        assert!(matches!(catalog.get("rs5"), Err(Error::Lookup { .. })));
    }

    #[test]
    fn test_reloaded_catalog_keeps_lookups() {
        let mut catalog = VariantCatalog::new();
        catalog
            .insert_batch(&[variant("rs1", 1.0, 0, 5), variant("rs2", 2.0, 1, 4)])
            .unwrap();
        let reloaded = VariantCatalog::from_table(catalog.table().clone()).unwrap();
        assert!(reloaded.is_sealed());
        assert_eq!(reloaded.get("rs2").unwrap(), catalog.get("rs2").unwrap());
    }

    #[test]
    fn test_query_rejects_empty_field_list() {
        let mut catalog = VariantCatalog::new();
        catalog.insert_batch(&[variant("rs1", 1.0, 0, 5)]).unwrap();
        let err = catalog.query(Some(&[])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref msg) if msg.contains("at least one field")));
    }
}
