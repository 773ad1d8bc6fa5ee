//! Matrix expansion for parallel job generation.

use indexmap::IndexMap;
use tripwire_core::ids::JobId;
use tripwire_core::interpolation::InterpolationContext;
use tripwire_core::pipeline::{PipelineDefinition, scalar_to_string};

type Combination = IndexMap<String, serde_json::Value>;

/// A single job in an expanded matrix.
#[derive(Debug, Clone)]
pub struct MatrixJob {
    pub id: JobId,
    pub index: usize,
    pub variables: Combination,
    pub display_name: String,
}

impl MatrixJob {
    /// Matrix values rendered as strings, in axis order.
    pub fn values(&self) -> IndexMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect()
    }
}

/// Result of matrix expansion.
#[derive(Debug, Clone)]
pub struct MatrixExpansion {
    pub jobs: Vec<MatrixJob>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

/// Expander for matrix configurations.
#[derive(Debug)]
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a pipeline's matrix into individual jobs.
    ///
    /// A pipeline without a matrix yields exactly one job.
    pub fn expand(&self, pipeline: &PipelineDefinition) -> MatrixExpansion {
        let Some(matrix) = pipeline.matrix.as_ref() else {
            return MatrixExpansion {
                jobs: vec![self.make_job(pipeline, 0, Combination::new())],
                fail_fast: true,
                max_parallel: None,
            };
        };

        let mut combinations = self.generate_combinations(&matrix.dimensions);

        // Apply includes
        for include in &matrix.include {
            if !combinations.contains(include) {
                combinations.push(include.clone());
            }
        }

        // Apply excludes
        combinations.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| self.matches_exclude(combo, exclude))
        });

        let jobs = combinations
            .into_iter()
            .enumerate()
            .map(|(idx, vars)| self.make_job(pipeline, idx, vars))
            .collect();

        MatrixExpansion {
            jobs,
            fail_fast: matrix.fail_fast,
            max_parallel: matrix.max_parallel,
        }
    }

    fn make_job(&self, pipeline: &PipelineDefinition, index: usize, vars: Combination) -> MatrixJob {
        let display_name = self.format_display_name(pipeline, &vars);
        MatrixJob {
            id: JobId::new(),
            index,
            variables: vars,
            display_name,
        }
    }

    fn generate_combinations(&self, dimensions: &IndexMap<String, Vec<serde_json::Value>>) -> Vec<Combination> {
        let mut result = vec![Combination::new()];

        for (key, values) in dimensions {
            let mut new_result = Vec::with_capacity(result.len() * values.len());

            for combo in result {
                for value in values {
                    let mut new_combo = combo.clone();
                    new_combo.insert(key.clone(), value.clone());
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        result
    }

    fn matches_exclude(&self, combo: &Combination, exclude: &Combination) -> bool {
        exclude
            .iter()
            .all(|(key, value)| combo.get(key) == Some(value))
    }

    fn format_display_name(&self, pipeline: &PipelineDefinition, vars: &Combination) -> String {
        if let Some(template) = &pipeline.job_name {
            let mut ctx = InterpolationContext::new();
            ctx.variables = pipeline
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            ctx.matrix = vars
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect();
            return ctx.interpolate(template);
        }

        if vars.is_empty() {
            return pipeline.name.clone();
        }

        let parts: Vec<String> = vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, scalar_to_string(v)))
            .collect();

        format!("{} ({})", pipeline.name, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripwire_core::pipeline::{MatrixConfig, StepDefinition};

    fn pipeline(matrix: Option<MatrixConfig>, job_name: Option<&str>) -> PipelineDefinition {
        PipelineDefinition {
            version: "1".to_string(),
            name: "test".to_string(),
            description: None,
            job_name: job_name.map(str::to_string),
            triggers: vec![],
            variables: Default::default(),
            matrix,
            steps: vec![StepDefinition::run("run", "true")],
        }
    }

    fn matrix(dims: &[(&str, serde_json::Value)]) -> MatrixConfig {
        let mut dimensions = IndexMap::new();
        for (name, values) in dims {
            let values = values.as_array().cloned().unwrap_or_default();
            dimensions.insert(name.to_string(), values);
        }
        MatrixConfig {
            dimensions,
            include: vec![],
            exclude: vec![],
            fail_fast: true,
            max_parallel: None,
        }
    }

    #[test]
    fn test_matrix_expansion() {
        let mut config = matrix(&[
            ("os", serde_json::json!(["linux", "macos"])),
            ("version", serde_json::json!(["18", "20", "22"])),
        ]);
        config.max_parallel = Some(4);

        let expansion = MatrixExpander::new().expand(&pipeline(Some(config), None));

        assert_eq!(expansion.jobs.len(), 6); // 2 OS × 3 versions
        assert!(expansion.fail_fast);
        assert_eq!(expansion.max_parallel, Some(4));
        assert_eq!(expansion.jobs[0].display_name, "test (os=linux, version=18)");
        assert_eq!(expansion.jobs[5].display_name, "test (os=macos, version=22)");
    }

    #[test]
    fn test_default_expander_without_matrix() {
        let expansion = MatrixExpander::default().expand(&pipeline(None, None));

        assert_eq!(expansion.jobs.len(), 1);
        assert_eq!(expansion.jobs[0].index, 0);
    }

    #[test]
    fn test_python_matrix_in_declaration_order() {
        let mut config = matrix(&[
            ("os", serde_json::json!(["ubuntu-latest"])),
            ("python-version", serde_json::json!(["3.7", "3.8", "3.9", "3.10"])),
        ]);
        config.fail_fast = false;

        let expansion = MatrixExpander::new().expand(&pipeline(
            Some(config),
            Some("Check Python ${{ matrix.python-version }} on ${{ matrix.os }}"),
        ));

        assert!(!expansion.fail_fast);
        let names: Vec<&str> = expansion
            .jobs
            .iter()
            .map(|j| j.display_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "Check Python 3.7 on ubuntu-latest",
                "Check Python 3.8 on ubuntu-latest",
                "Check Python 3.9 on ubuntu-latest",
                "Check Python 3.10 on ubuntu-latest",
            ]
        );
        let indices: Vec<usize> = expansion.jobs.iter().map(|j| j.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(expansion.jobs[3].values()["python-version"], "3.10");
    }

    #[test]
    fn test_matrix_with_exclude() {
        let mut config = matrix(&[
            ("os", serde_json::json!(["linux", "macos"])),
            ("arch", serde_json::json!(["amd64", "arm64"])),
        ]);
        let mut exclude = IndexMap::new();
        exclude.insert("os".to_string(), serde_json::json!("macos"));
        exclude.insert("arch".to_string(), serde_json::json!("amd64"));
        config.exclude.push(exclude);

        let expansion = MatrixExpander::new().expand(&pipeline(Some(config), None));

        // 2x2 = 4, minus 1 excluded = 3
        assert_eq!(expansion.jobs.len(), 3);
    }

    #[test]
    fn test_matrix_with_include() {
        let mut config = matrix(&[("python-version", serde_json::json!(["3.9"]))]);
        let mut include = IndexMap::new();
        include.insert("python-version".to_string(), serde_json::json!("3.11"));
        config.include.push(include.clone());
        // Duplicates of existing combinations are not added twice.
        let mut duplicate = IndexMap::new();
        duplicate.insert("python-version".to_string(), serde_json::json!("3.9"));
        config.include.push(duplicate);

        let expansion = MatrixExpander::new().expand(&pipeline(Some(config), None));
        assert_eq!(expansion.jobs.len(), 2);
        assert_eq!(expansion.jobs[1].variables, include);
    }

    #[test]
    fn test_no_matrix_single_job() {
        let expansion = MatrixExpander::new().expand(&pipeline(None, None));
        assert_eq!(expansion.jobs.len(), 1);
        assert!(expansion.jobs[0].variables.is_empty());
        assert_eq!(expansion.jobs[0].display_name, "test");
    }

    #[test]
    fn test_job_ids_unique() {
        let config = matrix(&[("n", serde_json::json!([1, 2, 3]))]);
        let expansion = MatrixExpander::new().expand(&pipeline(Some(config), None));
        let ids: std::collections::HashSet<_> = expansion.jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids.len(), 3);
    }
}
