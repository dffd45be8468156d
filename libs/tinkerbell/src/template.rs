//! Template resource types

use serde::{Deserialize, Serialize};

use crate::{ObjectMeta, PipelineDocument, PipelineError, TypeMeta};

/// Template resource holding a rendered pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    pub spec: TemplateSpec,
}

/// Template specification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateSpec {
    /// Pipeline document as YAML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Template {
    /// Render a validated pipeline into a Template.
    pub fn from_pipeline(
        metadata: ObjectMeta,
        pipeline: &PipelineDocument,
    ) -> Result<Self, PipelineError> {
        pipeline.validate()?;

        Ok(Self {
            type_meta: TypeMeta::template(),
            metadata,
            spec: TemplateSpec {
                data: Some(pipeline.to_yaml()?),
            },
        })
    }

    /// Decode the embedded pipeline.
    pub fn pipeline(&self) -> Result<PipelineDocument, PipelineError> {
        let data = self
            .spec
            .data
            .as_deref()
            .ok_or_else(|| PipelineError::MissingField("spec.data".to_string()))?;
        PipelineDocument::from_yaml(data)
    }
}
