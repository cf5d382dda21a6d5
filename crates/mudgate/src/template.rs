//! Prompt templates.
//!
//! Prompts are referenced by name; a name that isn't registered is rendered as
//! an inline template. Rendering never fails: a broken template logs and falls
//! back to its raw source so the player still sees something.

use minijinja::Environment;
use serde_json::Value;
use tracing::warn;

pub type DataBag = serde_json::Map<String, Value>;

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, data: &DataBag) -> String;
}

const BUILTIN: &[(&str, &str)] = &[
    (
        "login.name",
        "{% if error %}{{ error }}\r\n{% endif %}name: ",
    ),
    (
        "login.create",
        "{% if error %}{{ error }}\r\n{% endif %}no account named {{ name }}. create it? (y/n) ",
    ),
    (
        "login.password",
        "{% if error %}\r\n{{ error }}\r\n{% endif %}{% if create == 'y' %}set password (min 8 chars): {% else %}password: {% endif %}",
    ),
    (
        "login.confirm",
        "{% if error %}\r\n{{ error }}\r\n{% endif %}repeat password: ",
    ),
    (
        "login.pronouns",
        "{% if error %}{{ error }}\r\n{% endif %}pronouns ({{ choices }}) [they]: ",
    ),
];

#[derive(Debug)]
pub struct Prompts {
    env: Environment<'static>,
}

impl Default for Prompts {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Prompts {
    pub fn empty() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut p = Self::empty();
        for &(name, src) in BUILTIN {
            // Built-in sources are static and covered by tests.
            if let Err(e) = p.add(name, src) {
                warn!(template = %name, err = %e, "bad builtin template");
            }
        }
        p
    }

    pub fn add(&mut self, name: &'static str, source: &'static str) -> anyhow::Result<()> {
        self.env
            .add_template(name, source)
            .map_err(|e| anyhow::anyhow!("template {name}: {e}"))
    }
}

impl TemplateRenderer for Prompts {
    fn render(&self, template: &str, data: &DataBag) -> String {
        let res = match self.env.get_template(template) {
            Ok(t) => t.render(data),
            Err(_) => self.env.render_str(template, data),
        };
        match res {
            Ok(s) => s,
            Err(e) => {
                warn!(template = %template, err = %e, "template render failed");
                template.to_string()
            }
        }
    }
}
