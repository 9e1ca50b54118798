//! OpenAPI/Swagger document loading and the declared endpoint index

use crate::endpoint::{normalize_slashes, EndpointKey};
use crate::error::{CoverageError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File names tried when no spec path is configured, in order.
pub const DEFAULT_SPEC_NAMES: &[&str] = &[
    "openapi.yaml",
    "openapi.yml",
    "openapi.json",
    "swagger.yaml",
    "swagger.yml",
    "swagger.json",
];

/// Directories (relative to the project root) searched for [`DEFAULT_SPEC_NAMES`].
pub const DEFAULT_SPEC_DIRS: &[&str] = &["", "docs", "api"];

/// Immutable document tree: paths, path items, operations, parameters.
#[derive(Debug, Clone, Default)]
pub struct OpenApiDocument {
    /// Declared paths in document order
    pub paths: Vec<(String, PathItem)>,
    /// Reusable parameters (`components.parameters`, or Swagger 2 `parameters`)
    pub parameters: HashMap<String, Parameter>,
    /// Reusable schemas (`components.schemas`, or Swagger 2 `definitions`)
    pub schemas: HashMap<String, Schema>,
    /// Swagger 2 `basePath`, or the path of the first OpenAPI 3 server URL
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathItem {
    #[serde(default)]
    pub parameters: Vec<ParameterOrRef>,
    #[serde(default)]
    pub get: Option<Operation>,
    #[serde(default)]
    pub put: Option<Operation>,
    #[serde(default)]
    pub post: Option<Operation>,
    #[serde(default)]
    pub delete: Option<Operation>,
    #[serde(default)]
    pub options: Option<Operation>,
    #[serde(default)]
    pub head: Option<Operation>,
    #[serde(default)]
    pub patch: Option<Operation>,
    #[serde(default)]
    pub trace: Option<Operation>,
}

impl PathItem {
    /// Declared operations in OpenAPI field order.
    pub fn operations(&self) -> impl Iterator<Item = (&'static str, &Operation)> {
        [
            ("GET", &self.get),
            ("PUT", &self.put),
            ("POST", &self.post),
            ("DELETE", &self.delete),
            ("OPTIONS", &self.options),
            ("HEAD", &self.head),
            ("PATCH", &self.patch),
            ("TRACE", &self.trace),
        ]
        .into_iter()
        .filter_map(|(method, op)| op.as_ref().map(|op| (method, op)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterOrRef>,
}

/// A parameter given inline or by `$ref`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParameterOrRef {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Inline(Parameter),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "in", default)]
    pub location: String,
    #[serde(default)]
    pub schema: Option<Schema>,
    // Swagger 2 keeps the schema keywords on the parameter itself.
    #[serde(rename = "type", default)]
    pub schema_type: Option<SchemaType>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schema {
    #[serde(rename = "$ref", default)]
    pub reference: Option<String>,
    #[serde(rename = "type", default)]
    pub schema_type: Option<SchemaType>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<Value>>,
}

/// `type: integer` or, in OpenAPI 3.1, `type: [integer, "null"]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(String),
    Multiple(Vec<String>),
}

impl SchemaType {
    /// First non-null type name.
    pub fn primary(&self) -> Option<&str> {
        match self {
            SchemaType::Single(t) => Some(t.as_str()),
            SchemaType::Multiple(ts) => ts.iter().map(String::as_str).find(|t| *t != "null"),
        }
    }
}

/// A path parameter with `$ref`s resolved and Swagger 2 / OpenAPI 3 keywords
/// folded together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedParameter {
    pub name: String,
    pub schema_type: Option<String>,
    pub format: Option<String>,
    pub pattern: Option<String>,
    pub enum_values: Vec<String>,
}

impl OpenApiDocument {
    /// Parse a JSON or YAML document.
    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        let root: Value = if content.trim_start().starts_with('{') {
            serde_json::from_str(content).map_err(|e| e.to_string())?
        } else {
            let yaml: serde_yaml::Value =
                serde_yaml::from_str(content).map_err(|e| e.to_string())?;
            yaml_to_json(yaml)
        };
        Self::from_value(&root)
    }

    fn from_value(root: &Value) -> std::result::Result<Self, String> {
        let paths = root
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| "document has no `paths` mapping".to_string())?;

        let mut doc = OpenApiDocument::default();
        for (path, item) in paths {
            match serde_json::from_value::<PathItem>(item.clone()) {
                Ok(item) => doc.paths.push((path.clone(), item)),
                Err(e) => warn!("Skipping unparseable path item {}: {}", path, e),
            }
        }

        let components = root.get("components");
        let parameters = components
            .and_then(|c| c.get("parameters"))
            .or_else(|| root.get("parameters"));
        doc.parameters = named_map(parameters, "parameter");

        let schemas = components
            .and_then(|c| c.get("schemas"))
            .or_else(|| root.get("definitions"));
        doc.schemas = named_map(schemas, "schema");

        doc.base_path = root
            .get("basePath")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                root.get("servers")
                    .and_then(Value::as_array)
                    .and_then(|servers| servers.first())
                    .and_then(|server| server.get("url"))
                    .and_then(Value::as_str)
                    .and_then(server_url_path)
            })
            .map(|p| normalize_slashes(&p))
            .filter(|p| p != "/");

        Ok(doc)
    }

    fn resolve_parameter<'a>(&'a self, p: &'a ParameterOrRef) -> Option<&'a Parameter> {
        match p {
            ParameterOrRef::Inline(param) => Some(param),
            ParameterOrRef::Ref { reference } => {
                let name = ref_name(reference, &["#/components/parameters/", "#/parameters/"])?;
                let resolved = self.parameters.get(name);
                if resolved.is_none() {
                    debug!("Unresolved parameter reference {}", reference);
                }
                resolved
            }
        }
    }

    fn resolve_schema<'a>(&'a self, schema: &'a Schema) -> &'a Schema {
        schema
            .reference
            .as_deref()
            .and_then(|r| ref_name(r, &["#/components/schemas/", "#/definitions/"]))
            .and_then(|name| self.schemas.get(name))
            .unwrap_or(schema)
    }

    fn fold_parameter(&self, param: &Parameter) -> ResolvedParameter {
        let schema = param.schema.as_ref().map(|s| self.resolve_schema(s));
        let enum_values = param
            .enum_values
            .as_ref()
            .or_else(|| schema.and_then(|s| s.enum_values.as_ref()))
            .map(|values| values.iter().filter_map(enum_literal).collect())
            .unwrap_or_default();

        ResolvedParameter {
            name: param.name.clone(),
            schema_type: first_of(
                param.schema_type.as_ref().and_then(SchemaType::primary),
                schema.and_then(|s| s.schema_type.as_ref()).and_then(SchemaType::primary),
            ),
            format: first_of(
                param.format.as_deref(),
                schema.and_then(|s| s.format.as_deref()),
            ),
            pattern: first_of(
                param.pattern.as_deref(),
                schema.and_then(|s| s.pattern.as_deref()),
            ),
            enum_values,
        }
    }
}

/// Index of declared `(method, path)` keys over a loaded document.
#[derive(Debug, Clone, Default)]
pub struct SpecIndex {
    document: OpenApiDocument,
    keys: Vec<EndpointKey>,
    key_set: HashSet<EndpointKey>,
    paths: Vec<String>,
    strip_base: Option<String>,
    source: Option<PathBuf>,
}

impl SpecIndex {
    /// An index with nothing declared; every hit becomes "extra".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_document(document: OpenApiDocument) -> Self {
        let mut keys = Vec::new();
        let mut paths = Vec::new();
        for (path, item) in &document.paths {
            let path = normalize_slashes(path);
            for (method, _) in item.operations() {
                keys.push(EndpointKey::new(method, &path));
            }
            paths.push(path);
        }
        let key_set = keys.iter().cloned().collect();

        let strip_base = document
            .base_path
            .clone()
            .filter(|base| !paths.iter().any(|p| has_path_prefix(p, base)));

        Self {
            document,
            keys,
            key_set,
            paths,
            strip_base,
            source: None,
        }
    }

    /// Parse a JSON or YAML document from a string.
    pub fn parse(content: &str) -> Result<Self> {
        OpenApiDocument::parse(content)
            .map(Self::from_document)
            .map_err(|reason| CoverageError::SpecLoad {
                path: PathBuf::from("<inline>"),
                reason,
            })
    }

    /// Load a document from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoverageError::SpecLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let document = OpenApiDocument::parse(&content).map_err(|reason| {
            CoverageError::SpecLoad {
                path: path.to_path_buf(),
                reason,
            }
        })?;
        let mut index = Self::from_document(document);
        index.source = Some(path.to_path_buf());
        Ok(index)
    }

    /// Load the first candidate that exists and parses.
    ///
    /// Falls back to [`SpecIndex::empty`] when none does.
    pub fn load_first(candidates: &[PathBuf]) -> Self {
        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load(candidate) {
                Ok(index) => {
                    info!(
                        "Loaded {} endpoints from {}",
                        index.len(),
                        candidate.display()
                    );
                    return index;
                }
                Err(e) => warn!("{}", e),
            }
        }
        warn!(
            "No usable API spec among {} candidate locations; every hit will be reported as extra",
            candidates.len()
        );
        Self::empty()
    }

    pub fn document(&self) -> &OpenApiDocument {
        &self.document
    }

    /// Declared keys in document order.
    pub fn keys(&self) -> &[EndpointKey] {
        &self.keys
    }

    pub fn has_key(&self, key: &EndpointKey) -> bool {
        self.key_set.contains(key)
    }

    /// Declared paths in document order.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Declared keys for one method, in document order.
    pub fn keys_for_method<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a EndpointKey> {
        self.keys.iter().filter(move |k| k.method() == method)
    }

    /// Where the document was loaded from, if from a file.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Drop the document's base path from an observed path, when the declared
    /// paths are written relative to it.
    pub fn strip_base_path(&self, path: &str) -> String {
        match &self.strip_base {
            Some(base) if has_path_prefix(path, base) => normalize_slashes(&path[base.len()..]),
            _ => path.to_string(),
        }
    }

    /// Path parameters for a declared path: path-level first, then each
    /// operation's, with `$ref`s resolved. The first declaration of a name wins.
    pub fn resolved_parameters(&self, path: &str) -> Vec<ResolvedParameter> {
        let Some((_, item)) = self
            .document
            .paths
            .iter()
            .find(|(p, _)| normalize_slashes(p) == path)
        else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let declared = item
            .parameters
            .iter()
            .chain(item.operations().flat_map(|(_, op)| op.parameters.iter()));
        for p in declared {
            let Some(param) = self.document.resolve_parameter(p) else {
                continue;
            };
            if param.location != "path" || param.name.is_empty() {
                continue;
            }
            if seen.insert(param.name.clone()) {
                out.push(self.document.fold_parameter(param));
            }
        }
        out
    }
}

/// Default candidate spec locations under `root`.
pub fn default_spec_candidates(root: &Path) -> Vec<PathBuf> {
    DEFAULT_SPEC_DIRS
        .iter()
        .flat_map(|dir| {
            DEFAULT_SPEC_NAMES
                .iter()
                .map(move |name| root.join(dir).join(name))
        })
        .collect()
}

fn first_of(own: Option<&str>, from_schema: Option<&str>) -> Option<String> {
    own.or(from_schema).map(str::to_string)
}

fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn ref_name<'a>(reference: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|p| reference.strip_prefix(p))
}

fn server_url_path(url: &str) -> Option<String> {
    if url.starts_with('/') {
        return Some(url.to_string());
    }
    url::Url::parse(url).ok().map(|u| u.path().to_string())
}

fn enum_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn named_map<T: serde::de::DeserializeOwned>(value: Option<&Value>, what: &str) -> HashMap<String, T> {
    let Some(map) = value.and_then(Value::as_object) else {
        return HashMap::new();
    };
    map.iter()
        .filter_map(|(name, v)| match serde_json::from_value::<T>(v.clone()) {
            Ok(t) => Some((name.clone(), t)),
            Err(e) => {
                debug!("Ignoring unparseable {} {}: {}", what, name, e);
                None
            }
        })
        .collect()
}

/// YAML mapping keys may be numbers or booleans (`200:` under `responses`);
/// JSON object keys are always strings.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;
    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    _ => continue,
                };
                out.insert(key, yaml_to_json(v));
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETSTORE: &str = r##"
openapi: 3.0.0
servers:
  - url: https://api.example.com/v1
paths:
  /pets:
    get:
      responses:
        200:
          description: ok
    post: {}
  /pets/{petId}:
    parameters:
      - $ref: "#/components/parameters/PetId"
    get: {}
    delete:
      parameters:
        - name: petId
          in: path
          schema:
            type: string
components:
  parameters:
    PetId:
      name: petId
      in: path
      schema:
        type: integer
"##;

    #[test]
    fn keys_follow_document_order() {
        let spec = SpecIndex::parse(PETSTORE).unwrap();
        let keys: Vec<String> = spec.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec!["GET /pets", "POST /pets", "GET /pets/{petId}", "DELETE /pets/{petId}"]
        );
        assert!(spec.has_key(&EndpointKey::new("get", "/pets")));
        assert!(spec.has_path("/pets/{petId}"));
    }

    #[test]
    fn path_level_parameter_ref_wins() {
        let spec = SpecIndex::parse(PETSTORE).unwrap();
        let params = spec.resolved_parameters("/pets/{petId}");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "petId");
        assert_eq!(params[0].schema_type.as_deref(), Some("integer"));
    }

    #[test]
    fn server_path_is_stripped() {
        let spec = SpecIndex::parse(PETSTORE).unwrap();
        assert_eq!(spec.strip_base_path("/v1/pets/3"), "/pets/3");
        assert_eq!(spec.strip_base_path("/v10/pets"), "/v10/pets");
        assert_eq!(spec.strip_base_path("/pets"), "/pets");
    }

    #[test]
    fn base_path_kept_when_paths_include_it() {
        let spec = SpecIndex::parse(
            r#"{"swagger": "2.0", "basePath": "/api", "paths": {"/api/items": {"get": {}}}}"#,
        )
        .unwrap();
        assert_eq!(spec.strip_base_path("/api/items"), "/api/items");
    }

    #[test]
    fn server_path_kept_when_paths_include_it() {
        let spec = SpecIndex::parse(
            r#"{"openapi": "3.0.0",
                "servers": [{"url": "https://api.example.com/v1"}],
                "paths": {"/v1/pets": {"get": {}}}}"#,
        )
        .unwrap();
        assert_eq!(spec.strip_base_path("/v1/pets"), "/v1/pets");
        assert_eq!(spec.strip_base_path("/pets"), "/pets");
    }

    #[test]
    fn swagger2_inline_keywords() {
        let spec = SpecIndex::parse(
            r#"{
                "swagger": "2.0",
                "paths": {
                    "/reports/{kind}": {
                        "get": {
                            "parameters": [
                                {"name": "kind", "in": "path", "type": "string", "enum": ["daily", "weekly"]},
                                {"name": "limit", "in": "query", "type": "integer"}
                            ]
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let params = spec.resolved_parameters("/reports/{kind}");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].enum_values, vec!["daily", "weekly"]);
    }

    #[test]
    fn schema_refs_resolve() {
        let spec = SpecIndex::parse(
            r##"
openapi: 3.1.0
paths:
  /orders/{id}:
    get:
      parameters:
        - name: id
          in: path
          schema:
            $ref: "#/components/schemas/OrderId"
components:
  schemas:
    OrderId:
      type: [string, "null"]
      format: uuid
"##,
        )
        .unwrap();
        let params = spec.resolved_parameters("/orders/{id}");
        assert_eq!(params[0].schema_type.as_deref(), Some("string"));
        assert_eq!(params[0].format.as_deref(), Some("uuid"));
    }

    #[test]
    fn missing_paths_is_a_load_error() {
        let err = SpecIndex::parse("openapi: 3.0.0\ninfo: {}\n").unwrap_err();
        assert!(matches!(err, CoverageError::SpecLoad { .. }));
    }

    #[test]
    fn load_first_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("openapi.yaml");
        std::fs::write(&broken, "paths: [").unwrap();
        let spec = SpecIndex::load_first(&[dir.path().join("missing.json"), broken]);
        assert!(spec.is_empty());
    }

    #[test]
    fn load_first_takes_first_parseable() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("swagger.json");
        std::fs::write(&good, r#"{"paths": {"/a": {"get": {}}}}"#).unwrap();
        let spec = SpecIndex::load_first(&default_spec_candidates(dir.path()));
        assert_eq!(spec.len(), 1);
        assert_eq!(spec.source(), Some(good.as_path()));
    }
}
