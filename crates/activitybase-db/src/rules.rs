use activitybase_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const AUTH_PREFIX: &str = "@request.auth.";

/// The operation a rule guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    List,
    View,
    Create,
    Update,
    Delete,
}

impl RuleOp {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleOp::List => "list",
            RuleOp::View => "view",
            RuleOp::Create => "create",
            RuleOp::Update => "update",
            RuleOp::Delete => "delete",
        }
    }
}

/// The authenticated principal behind a request, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl AuthRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub auth: Option<AuthRecord>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self { auth: None }
    }

    pub fn authenticated(auth: AuthRecord) -> Self {
        Self { auth: Some(auth) }
    }

    fn resolve(&self, path: &str) -> String {
        let Some(auth) = &self.auth else {
            return String::new();
        };
        if path == "id" {
            return auth.id.clone();
        }
        match auth.fields.get(path) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// A per-operation authorization predicate. Absent or empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessRule(Option<String>);

impl AccessRule {
    pub fn new(expr: impl Into<String>) -> Self {
        Self(Some(expr.into()))
    }

    pub fn unrestricted() -> Self {
        Self(None)
    }

    pub fn expression(&self) -> Option<&str> {
        self.0.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }

    pub fn allows(&self, ctx: &RequestContext) -> Result<bool> {
        match self.compile()? {
            None => Ok(true),
            Some(expr) => Ok(expr.eval(ctx)),
        }
    }

    fn compile(&self) -> Result<Option<RuleExpr>> {
        match self.expression() {
            None => Ok(None),
            Some(src) => RuleExpr::parse(src).map(Some),
        }
    }
}

/// The five collection-level rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessRules {
    pub list_rule: AccessRule,
    pub view_rule: AccessRule,
    pub create_rule: AccessRule,
    pub update_rule: AccessRule,
    pub delete_rule: AccessRule,
}

impl AccessRules {
    /// Same expression for every operation.
    pub fn all(expr: &str) -> Self {
        Self {
            list_rule: AccessRule::new(expr),
            view_rule: AccessRule::new(expr),
            create_rule: AccessRule::new(expr),
            update_rule: AccessRule::new(expr),
            delete_rule: AccessRule::new(expr),
        }
    }

    pub fn rule(&self, op: RuleOp) -> &AccessRule {
        match op {
            RuleOp::List => &self.list_rule,
            RuleOp::View => &self.view_rule,
            RuleOp::Create => &self.create_rule,
            RuleOp::Update => &self.update_rule,
            RuleOp::Delete => &self.delete_rule,
        }
    }

    pub fn allows(&self, op: RuleOp, ctx: &RequestContext) -> Result<bool> {
        self.rule(op).allows(ctx)
    }

    pub fn validate(&self) -> Result<()> {
        for op in [
            RuleOp::List,
            RuleOp::View,
            RuleOp::Create,
            RuleOp::Update,
            RuleOp::Delete,
        ] {
            self.rule(op).validate().map_err(|e| {
                Error::Validation(format!("{} rule: {e}", op.as_str()))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Literal(String),
    Eq,
    NotEq,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Auth(String),
    Literal(String),
}

impl Operand {
    fn value(&self, ctx: &RequestContext) -> String {
        match self {
            Operand::Auth(path) => ctx.resolve(path),
            Operand::Literal(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    left: Operand,
    negated: bool,
    right: Operand,
}

/// Disjunction of conjunctions; `&&` binds tighter than `||`.
#[derive(Debug, Clone, PartialEq)]
struct RuleExpr(Vec<Vec<Comparison>>);

impl RuleExpr {
    fn parse(src: &str) -> Result<Self> {
        let tokens = tokenize(src)?;
        let mut groups = vec![Vec::new()];
        let mut iter = tokens.into_iter();

        loop {
            let left = parse_operand(iter.next(), src)?;
            let negated = match iter.next() {
                Some(Token::Eq) => false,
                Some(Token::NotEq) => true,
                other => return Err(syntax(src, format!("expected = or !=, got {other:?}"))),
            };
            let right = parse_operand(iter.next(), src)?;
            if let Some(group) = groups.last_mut() {
                group.push(Comparison {
                    left,
                    negated,
                    right,
                });
            }

            match iter.next() {
                None => break,
                Some(Token::And) => {}
                Some(Token::Or) => groups.push(Vec::new()),
                Some(other) => {
                    return Err(syntax(src, format!("unexpected {other:?}")));
                }
            }
        }

        Ok(Self(groups))
    }

    fn eval(&self, ctx: &RequestContext) -> bool {
        self.0.iter().any(|group| {
            group
                .iter()
                .all(|c| (c.left.value(ctx) == c.right.value(ctx)) != c.negated)
        })
    }
}

fn parse_operand(token: Option<Token>, src: &str) -> Result<Operand> {
    match token {
        Some(Token::Literal(s)) => Ok(Operand::Literal(s)),
        Some(Token::Path(path)) => match path.strip_prefix(AUTH_PREFIX) {
            Some(field) if !field.is_empty() && !field.contains('.') => {
                Ok(Operand::Auth(field.to_string()))
            }
            _ => Err(syntax(src, format!("unsupported identifier {path}"))),
        },
        other => Err(syntax(src, format!("expected operand, got {other:?}"))),
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(syntax(src, "expected != ".into()));
                }
                tokens.push(Token::NotEq);
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return Err(syntax(src, format!("expected {c}{c}")));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            '\'' | '"' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some(ch) => literal.push(ch),
                        None => return Err(syntax(src, "unterminated string".into())),
                    }
                }
                tokens.push(Token::Literal(literal));
            }
            '@' => {
                let mut path = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '@') {
                        path.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Path(path));
            }
            other => return Err(syntax(src, format!("unexpected character '{other}'"))),
        }
    }

    if tokens.is_empty() {
        return Err(syntax(src, "empty expression".into()));
    }
    Ok(tokens)
}

fn syntax(src: &str, msg: String) -> Error {
    Error::Validation(format!("invalid rule `{src}`: {msg}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const AUTHENTICATED: &str = "@request.auth.id != ''";

    #[test]
    fn authenticated_rule_rejects_anonymous() {
        let rule = AccessRule::new(AUTHENTICATED);
        assert!(!rule.allows(&RequestContext::anonymous()).unwrap());
        assert!(
            rule.allows(&RequestContext::authenticated(AuthRecord::new("u1")))
                .unwrap()
        );
    }

    #[test]
    fn empty_and_absent_rules_are_unrestricted() {
        let anon = RequestContext::anonymous();
        assert!(AccessRule::unrestricted().allows(&anon).unwrap());
        assert!(AccessRule::new("").allows(&anon).unwrap());
        assert!(AccessRule::new("   ").allows(&anon).unwrap());
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let rule = AccessRule::new(
            "@request.auth.role = 'admin' || @request.auth.id != '' && @request.auth.verified = 'true'",
        );
        let admin = RequestContext::authenticated(
            AuthRecord::new("a").with_field("role", json!("admin")),
        );
        let verified = RequestContext::authenticated(
            AuthRecord::new("b").with_field("verified", json!(true)),
        );
        let unverified = RequestContext::authenticated(AuthRecord::new("c"));

        assert!(rule.allows(&admin).unwrap());
        assert!(rule.allows(&verified).unwrap());
        assert!(!rule.allows(&unverified).unwrap());
    }

    #[test]
    fn double_quoted_literals_parse() {
        let rule = AccessRule::new("@request.auth.id = \"u1\"");
        assert!(
            rule.allows(&RequestContext::authenticated(AuthRecord::new("u1")))
                .unwrap()
        );
    }

    #[test]
    fn unsupported_syntax_is_rejected() {
        for src in [
            "@request.auth.id",
            "@request.auth.id > ''",
            "@collection.users.id != ''",
            "@request.auth.id != 'x",
            "@request.auth.id != '' &&",
            "(@request.auth.id != '')",
        ] {
            assert!(AccessRule::new(src).validate().is_err(), "{src}");
        }
    }

    #[test]
    fn rules_serialize_with_camel_case_keys() {
        let rules = AccessRules::all(AUTHENTICATED);
        let json = serde_json::to_value(&rules).unwrap();
        assert_eq!(json["listRule"], AUTHENTICATED);
        assert_eq!(json["deleteRule"], AUTHENTICATED);

        let open: AccessRules = serde_json::from_value(json!({ "listRule": null })).unwrap();
        assert_eq!(open, AccessRules::default());
    }
}
