//! Read-only catalog of models, test cases, dimensions and evaluators.
//!
//! Loaded once at startup from a JSON document; the engine never mutates it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use validator::Validate;

use llm_eval_core::{
    Catalog, CoreError, Dimension, DimensionId, Evaluator, EvaluatorId, Model, ModelId, Result,
    TestCase, TestCaseId,
};

/// On-disk shape of a catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub evaluators: Vec<Evaluator>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    models: HashMap<ModelId, Model>,
    test_cases: HashMap<TestCaseId, TestCase>,
    dimensions: HashMap<DimensionId, Dimension>,
    evaluators: HashMap<EvaluatorId, Evaluator>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.models.insert(model.id, model);
        self
    }

    pub fn with_test_case(mut self, test_case: TestCase) -> Self {
        self.test_cases.insert(test_case.id, test_case);
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.insert(dimension.id, dimension);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluators.insert(evaluator.id, evaluator);
        self
    }

    /// Builds a catalog from a document, validating every entry and every
    /// cross reference.
    pub fn from_document(doc: CatalogDocument) -> Result<Self> {
        for model in &doc.models {
            model.validate()?;
        }
        for test_case in &doc.test_cases {
            test_case.validate()?;
        }
        for dimension in &doc.dimensions {
            dimension.validate()?;
        }

        let mut catalog = Self::new();
        catalog.models.extend(doc.models.into_iter().map(|m| (m.id, m)));
        catalog
            .test_cases
            .extend(doc.test_cases.into_iter().map(|t| (t.id, t)));
        catalog
            .dimensions
            .extend(doc.dimensions.into_iter().map(|d| (d.id, d)));
        catalog
            .evaluators
            .extend(doc.evaluators.into_iter().map(|e| (e.id, e)));

        for dimension in catalog.dimensions.values() {
            if !catalog.evaluators.contains_key(&dimension.evaluator_id) {
                return Err(CoreError::Validation(format!(
                    "dimension {} references unknown evaluator {}",
                    dimension.name, dimension.evaluator_id
                )));
            }
            if let Some(missing) = dimension
                .depends_on
                .iter()
                .find(|d| !catalog.dimensions.contains_key(d))
            {
                return Err(CoreError::Validation(format!(
                    "dimension {} depends on unknown dimension {}",
                    dimension.name, missing
                )));
            }
        }

        tracing::info!(
            models = catalog.models.len(),
            test_cases = catalog.test_cases.len(),
            dimensions = catalog.dimensions.len(),
            evaluators = catalog.evaluators.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::Internal(format!("failed to read catalog {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_model(&self, id: &ModelId) -> Result<Option<Model>> {
        Ok(self.models.get(id).cloned())
    }

    async fn find_model(&self, logical_name: &str) -> Result<Option<Model>> {
        Ok(self
            .models
            .values()
            .find(|m| m.logical_name == logical_name)
            .cloned())
    }

    async fn list_models(&self) -> Result<Vec<Model>> {
        let mut models: Vec<Model> = self.models.values().cloned().collect();
        models.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        Ok(models)
    }

    async fn get_test_case(&self, id: &TestCaseId) -> Result<Option<TestCase>> {
        Ok(self.test_cases.get(id).cloned())
    }

    async fn get_dimension(&self, id: &DimensionId) -> Result<Option<Dimension>> {
        Ok(self.dimensions.get(id).cloned())
    }

    async fn get_evaluator(&self, id: &EvaluatorId) -> Result<Option<Evaluator>> {
        Ok(self.evaluators.get(id).cloned())
    }
}
