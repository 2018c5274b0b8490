use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

/// A named starter program the host can offer in a picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub source: String,
}

#[derive(Debug)]
pub enum TemplateError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TemplateError::Io(err) => write!(f, "failed to read template file: {}", err),
            TemplateError::Json(err) => write!(f, "failed to parse template file: {}", err),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::Io(err) => Some(err),
            TemplateError::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for TemplateError {
    fn from(err: std::io::Error) -> Self {
        TemplateError::Io(err)
    }
}

impl From<serde_json::Error> for TemplateError {
    fn from(err: serde_json::Error) -> Self {
        TemplateError::Json(err)
    }
}

/// Ordered collection of templates, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: Vec<Template>,
}

impl TemplateLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in starter set.
    pub fn builtin() -> Self {
        Self {
            templates: vec![
                Template {
                    name: "hello".to_string(),
                    description: "Print a greeting".to_string(),
                    source: "console.log(\"Hello, World!\")\n".to_string(),
                },
                Template {
                    name: "fizzbuzz".to_string(),
                    description: "Classic loop with branching".to_string(),
                    source: "for (let i = 1; i <= 15; i++) {\n  let label = \"\";\n  if (i % 3 === 0) {\n    label += \"Fizz\";\n  }\n  if (i % 5 === 0) {\n    label += \"Buzz\";\n  }\n  console.log(label || i);\n}\n".to_string(),
                },
                Template {
                    name: "error-demo".to_string(),
                    description: "Throw and observe a runtime error".to_string(),
                    source: "function explode() {\n  throw new Error(\"something went wrong\");\n}\n\nconsole.log(\"about to fail\");\nexplode();\n".to_string(),
                },
            ],
        }
    }

    /// Loads a library from a JSON array of templates.
    pub fn from_json_file(path: &Path) -> Result<Self, TemplateError> {
        let text = fs::read_to_string(path)?;
        let templates: Vec<Template> = serde_json::from_str(&text)?;
        debug!(count = templates.len(), path = %path.display(), "loaded template library");
        Ok(Self { templates })
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Templates in insertion order.
    pub fn list(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Folds `other` in: same-named templates are replaced in place, new
    /// ones appended in their incoming order.
    pub fn merge(&mut self, other: TemplateLibrary) {
        for template in other.templates {
            match self.templates.iter_mut().find(|t| t.name == template.name) {
                Some(existing) => *existing = template,
                None => self.templates.push(template),
            }
        }
    }
}
