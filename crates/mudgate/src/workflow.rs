//! Multi-step prompt workflows.
//!
//! A [`Workflow`] asks an ordered list of [`Step`]s one line at a time, keeps
//! the answers, and calls its completion callback once every applicable step
//! has a valid answer. It runs entirely inside the connection's task; the
//! host context `C` is whatever the connection hands to the callback, and
//! only needs to expose a writer and the echo controller ([`Terminal`]).
//!
//! Lifecycle: `NotStarted -> AwaitingStep(i) -> ... -> Completed`, with
//! `Aborted` reachable from any state. Masked steps switch client echo off
//! while they are presented and back on as soon as they are answered, and on
//! abort.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use mudio::echo::EchoController;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::template::{DataBag, TemplateRenderer};

/// What the engine needs from the connection it runs on.
pub trait Terminal {
    fn echo(&mut self) -> &mut EchoController;
    fn write(&mut self, bytes: &[u8]);

    fn set_echo(&mut self, enabled: bool) {
        if let Some(b) = self.echo().set_echo(enabled) {
            self.write(&b);
        }
    }
}

pub type Validator = Box<dyn Fn(&str, &Answers) -> Result<String, String> + Send + Sync>;
pub type Condition = Box<dyn Fn(&Answers) -> bool + Send + Sync>;
pub type ExtraData = Box<dyn Fn(&Answers) -> DataBag + Send + Sync>;
pub type OnComplete<C> = Box<dyn FnMut(&Answers, &mut Memory, &mut C) -> Completion + Send>;

/// What an empty answer means for a step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OnEmpty {
    /// Hand `""` to the validator like any other answer.
    #[default]
    Validate,
    /// Use this value without validating.
    Default(String),
    /// Present the step again, no error shown.
    Reprompt,
    /// Abort the whole workflow.
    Abort,
}

pub struct Step {
    key: String,
    template: String,
    validate: Validator,
    condition: Option<Condition>,
    extra: Option<ExtraData>,
    masked: bool,
    on_empty: OnEmpty,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("template", &self.template)
            .field("masked", &self.masked)
            .field("on_empty", &self.on_empty)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl Step {
    /// A step accepting any answer.
    pub fn new(key: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            template: template.into(),
            validate: Box::new(|s, _| Ok(s.to_string())),
            condition: None,
            extra: None,
            masked: false,
            on_empty: OnEmpty::Validate,
        }
    }

    /// `Ok` carries the value to store (normalized), `Err` the explanation shown to the player.
    pub fn validate(
        mut self,
        f: impl Fn(&str, &Answers) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Box::new(f);
        self
    }

    /// Only ask this step when `f` holds for the answers so far.
    pub fn when(mut self, f: impl Fn(&Answers) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Box::new(f));
        self
    }

    /// Extra template data computed from the answers so far.
    pub fn extra(mut self, f: impl Fn(&Answers) -> DataBag + Send + Sync + 'static) -> Self {
        self.extra = Some(Box::new(f));
        self
    }

    pub fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    pub fn on_empty(mut self, policy: OnEmpty) -> Self {
        self.on_empty = policy;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }

    fn applies(&self, answers: &Answers) -> bool {
        self.condition.as_ref().is_none_or(|c| c(answers))
    }
}

/// Collected answers by step key. Masked values are wiped on drop and never printed.
#[derive(Default)]
pub struct Answers {
    values: BTreeMap<String, Zeroizing<String>>,
    masked: BTreeSet<String>,
}

impl fmt::Debug for Answers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for (k, v) in &self.values {
            if self.masked.contains(k) {
                m.entry(k, &"<redacted>");
            } else {
                m.entry(k, &v.as_str());
            }
        }
        m.finish()
    }
}

impl Answers {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn is_masked(&self, key: &str) -> bool {
        self.masked.contains(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn insert(&mut self, key: &str, value: String, masked: bool) {
        self.values.insert(key.to_string(), Zeroizing::new(value));
        if masked {
            self.masked.insert(key.to_string());
        } else {
            self.masked.remove(key);
        }
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.masked.remove(key);
    }
}

/// Free-form storage that survives across steps and completions.
#[derive(Debug, Default)]
pub struct Memory {
    values: HashMap<String, String>,
}

impl Memory {
    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn recall(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn forget(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }
}

/// Completion callback verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Done; detach the workflow.
    Clear,
    /// Done, but leave the (completed) workflow attached.
    Keep,
    /// Drop the answers from this step on and ask again from there.
    Rewind(String),
    /// Done; drop the connection.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    NotStarted,
    AwaitingStep(usize),
    Completed,
    Aborted,
}

/// Outcome of one submitted line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
    /// Validation failed; `key` was presented again with the reason.
    Rejected { key: String, reason: String },
    /// Empty answer on a [`OnEmpty::Reprompt`] step; presented again.
    Reprompted { key: String },
    /// Answer stored; `key` is the step now presented.
    Next { key: String },
    /// The callback asked to go back; `key` is presented.
    Rewound { key: String },
    /// The callback ran.
    Completed(Completion),
    Aborted,
    /// Not awaiting an answer (not started, completed or aborted).
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    Empty,
    DuplicateKey(String),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Empty => write!(f, "workflow has no steps"),
            WorkflowError::DuplicateKey(k) => write!(f, "duplicate step key: {k}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

pub struct Workflow<C> {
    steps: Vec<Step>,
    state: WorkflowState,
    answers: Answers,
    memory: Memory,
    /// Stands in for masked answers when rendering; masked answers are left out when unset.
    mask: Option<String>,
    on_complete: OnComplete<C>,
    error: Option<String>,
}

impl<C> fmt::Debug for Workflow<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("answers", &self.answers)
            .finish_non_exhaustive()
    }
}

/// Attach a workflow to `slot` unless an active one is already there.
///
/// Returns the attached workflow and whether it was newly built. A new
/// workflow is `NotStarted`; call [`Workflow::begin`] to present its first step.
pub fn start<C>(
    slot: &mut Option<Workflow<C>>,
    build: impl FnOnce() -> Result<Workflow<C>, WorkflowError>,
) -> Result<(&mut Workflow<C>, bool), WorkflowError> {
    let (wf, is_new) = match slot.take() {
        Some(wf) if wf.is_active() => (wf, false),
        _ => (build()?, true),
    };
    Ok((slot.insert(wf), is_new))
}

impl<C> Workflow<C> {
    pub fn with_mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            WorkflowState::NotStarted | WorkflowState::AwaitingStep(_)
        )
    }

    pub fn current_step(&self) -> Option<&Step> {
        match self.state {
            WorkflowState::AwaitingStep(i) => self.steps.get(i),
            _ => None,
        }
    }

    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.memory.remember(key, value);
    }

    pub fn recall(&self, key: &str) -> Option<&str> {
        self.memory.recall(key)
    }
}

impl<C: Terminal> Workflow<C> {
    pub fn new(
        steps: Vec<Step>,
        on_complete: impl FnMut(&Answers, &mut Memory, &mut C) -> Completion + Send + 'static,
    ) -> Result<Self, WorkflowError> {
        if steps.is_empty() {
            return Err(WorkflowError::Empty);
        }
        let mut seen = BTreeSet::new();
        for s in &steps {
            if !seen.insert(s.key.as_str()) {
                return Err(WorkflowError::DuplicateKey(s.key.clone()));
            }
        }
        Ok(Self {
            steps,
            state: WorkflowState::NotStarted,
            answers: Answers::default(),
            memory: Memory::default(),
            mask: None,
            on_complete: Box::new(on_complete),
            error: None,
        })
    }

    /// Present the first applicable step (or complete right away if none applies).
    pub fn begin(&mut self, renderer: &dyn TemplateRenderer, cx: &mut C) -> Submit {
        if self.state != WorkflowState::NotStarted {
            return Submit::Ignored;
        }
        self.goto(0, renderer, cx)
    }

    pub fn submit(&mut self, raw: &str, renderer: &dyn TemplateRenderer, cx: &mut C) -> Submit {
        let WorkflowState::AwaitingStep(i) = self.state else {
            return Submit::Ignored;
        };
        let step = &self.steps[i];
        let key = step.key.clone();
        let masked = step.masked;
        let on_empty = step.on_empty.clone();
        if masked {
            // The client didn't echo the newline either.
            cx.write(b"\r\n");
        }

        let res = if raw.is_empty() {
            match on_empty {
                OnEmpty::Validate => (self.steps[i].validate)(raw, &self.answers),
                OnEmpty::Default(v) => Ok(v),
                OnEmpty::Reprompt => {
                    self.present(renderer, cx);
                    return Submit::Reprompted { key };
                }
                OnEmpty::Abort => {
                    self.abort(cx);
                    return Submit::Aborted;
                }
            }
        } else {
            (self.steps[i].validate)(raw, &self.answers)
        };

        match res {
            Err(reason) => {
                self.error = Some(reason.clone());
                self.present(renderer, cx);
                Submit::Rejected { key, reason }
            }
            Ok(value) => {
                self.answers.insert(&key, value, masked);
                self.goto(i + 1, renderer, cx)
            }
        }
    }

    /// Discard the workflow; echo is handed back to the client.
    pub fn abort(&mut self, cx: &mut C) {
        if self.is_active() {
            self.state = WorkflowState::Aborted;
        }
        cx.set_echo(true);
    }

    /// The current step's prompt, resolved against the answers so far.
    pub fn render(&self, renderer: &dyn TemplateRenderer) -> String {
        let WorkflowState::AwaitingStep(i) = self.state else {
            return String::new();
        };
        let step = &self.steps[i];

        let mut data = DataBag::new();
        for (k, v) in &self.answers.values {
            if self.answers.masked.contains(k) {
                if let Some(mask) = &self.mask {
                    data.insert(k.clone(), Value::String(mask.clone()));
                }
            } else {
                data.insert(k.clone(), Value::String(v.as_str().to_string()));
            }
        }
        if let Some(extra) = &step.extra {
            data.extend(extra(&self.answers));
        }
        if let Some(err) = &self.error {
            data.insert("error".to_string(), Value::String(err.clone()));
        }
        data.insert("step".to_string(), Value::from(i + 1));
        data.insert("steps".to_string(), Value::from(self.steps.len()));

        renderer.render(&step.template, &data)
    }

    fn next_applicable(&self, from: usize) -> usize {
        (from..self.steps.len())
            .find(|&j| self.steps[j].applies(&self.answers))
            .unwrap_or(self.steps.len())
    }

    /// Move to the first applicable step at or after `from`; complete if there is none.
    fn goto(&mut self, from: usize, renderer: &dyn TemplateRenderer, cx: &mut C) -> Submit {
        let next = self.next_applicable(from);
        if next == self.steps.len() {
            return self.finish(renderer, cx);
        }
        self.state = WorkflowState::AwaitingStep(next);
        self.present(renderer, cx);
        Submit::Next {
            key: self.steps[next].key.clone(),
        }
    }

    fn present(&mut self, renderer: &dyn TemplateRenderer, cx: &mut C) {
        let Some(masked) = self.current_step().map(Step::is_masked) else {
            return;
        };
        cx.set_echo(!masked);
        let text = self.render(renderer);
        self.error = None;
        cx.write(text.as_bytes());
    }

    fn finish(&mut self, renderer: &dyn TemplateRenderer, cx: &mut C) -> Submit {
        self.state = WorkflowState::Completed;
        cx.set_echo(true);

        match (self.on_complete)(&self.answers, &mut self.memory, cx) {
            Completion::Rewind(key) => self.rewind(&key, renderer, cx),
            other => Submit::Completed(other),
        }
    }

    fn rewind(&mut self, key: &str, renderer: &dyn TemplateRenderer, cx: &mut C) -> Submit {
        let Some(r) = self.steps.iter().position(|s| s.key == key) else {
            tracing::warn!(step = %key, "rewind to unknown step; aborting workflow");
            self.state = WorkflowState::Aborted;
            return Submit::Aborted;
        };
        for s in &self.steps[r..] {
            self.answers.remove(&s.key);
        }
        let next = self.next_applicable(r);
        if next == self.steps.len() {
            self.state = WorkflowState::Aborted;
            return Submit::Aborted;
        }
        self.state = WorkflowState::AwaitingStep(next);
        self.present(renderer, cx);
        Submit::Rewound {
            key: self.steps[next].key.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::template::Prompts;
    use mudio::telnet::{IAC, OPT_ECHO, WILL, WONT};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub(crate) struct Tty {
        pub echo: EchoController,
        pub out: Vec<u8>,
    }

    impl Tty {
        pub(crate) fn take(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.out)
        }
    }

    impl Terminal for Tty {
        fn echo(&mut self) -> &mut EchoController {
            &mut self.echo
        }

        fn write(&mut self, bytes: &[u8]) {
            self.out.extend_from_slice(bytes);
        }
    }

    fn yes_no(s: &str, _: &Answers) -> Result<String, String> {
        match s.to_ascii_lowercase().as_str() {
            "y" | "yes" => Ok("y".to_string()),
            "n" | "no" => Ok("n".to_string()),
            _ => Err("please answer y or n".to_string()),
        }
    }

    type Seen = Arc<Mutex<Vec<BTreeMap<String, String>>>>;

    fn snapshot(a: &Answers) -> BTreeMap<String, String> {
        a.keys()
            .map(|k| (k.to_string(), a.get(k).unwrap_or_default().to_string()))
            .collect()
    }

    fn three_steps(seen: Seen) -> Workflow<Tty> {
        Workflow::new(
            vec![
                Step::new("username", "username: "),
                Step::new("password", "password: ").masked(),
                Step::new(
                    "confirm",
                    "{% if error %}{{ error }}\r\n{% endif %}create {{ username }}? (y/n) ",
                )
                .validate(yes_no),
            ],
            move |a: &Answers, _: &mut Memory, _: &mut Tty| {
                seen.lock().unwrap().push(snapshot(a));
                Completion::Clear
            },
        )
        .unwrap()
    }

    #[test]
    fn three_step_dialogue() {
        let r = Prompts::empty();
        let seen = Seen::default();
        let mut tty = Tty::default();
        let mut wf = three_steps(seen.clone());

        assert_eq!(
            wf.begin(&r, &mut tty),
            Submit::Next {
                key: "username".into()
            }
        );
        assert_eq!(tty.take(), b"username: ");

        wf.submit("alice", &r, &mut tty);
        assert_eq!(wf.state(), WorkflowState::AwaitingStep(1));
        let mut expected = vec![IAC, WILL, OPT_ECHO];
        expected.extend_from_slice(b"password: ");
        assert_eq!(tty.take(), expected);

        wf.submit("s3cret", &r, &mut tty);
        let mut expected = b"\r\n".to_vec();
        expected.extend_from_slice(&[IAC, WONT, OPT_ECHO]);
        expected.extend_from_slice(b"create alice? (y/n) ");
        assert_eq!(tty.take(), expected);

        let rejected = wf.submit("maybe", &r, &mut tty);
        assert_eq!(
            rejected,
            Submit::Rejected {
                key: "confirm".into(),
                reason: "please answer y or n".into()
            }
        );
        assert_eq!(wf.state(), WorkflowState::AwaitingStep(2));
        assert_eq!(
            tty.take(),
            b"please answer y or n\r\ncreate alice? (y/n) ".to_vec()
        );
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(
            wf.submit("Y", &r, &mut tty),
            Submit::Completed(Completion::Clear)
        );
        assert_eq!(wf.state(), WorkflowState::Completed);
        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["username"], "alice");
        assert_eq!(calls[0]["password"], "s3cret");
        assert_eq!(calls[0]["confirm"], "y");
        assert_eq!(wf.submit("late", &r, &mut tty), Submit::Ignored);
    }

    #[test]
    fn false_condition_is_never_presented() {
        let r = Prompts::empty();
        let mut tty = Tty::default();
        let mut wf = Workflow::new(
            vec![
                Step::new("kind", "kind: "),
                Step::new("wand", "wand: ").when(|a| a.get("kind") == Some("mage")),
                Step::new("name", "name: "),
            ],
            |_: &Answers, _: &mut Memory, _: &mut Tty| Completion::Clear,
        )
        .unwrap();

        wf.begin(&r, &mut tty);
        assert_eq!(
            wf.submit("fighter", &r, &mut tty),
            Submit::Next { key: "name".into() }
        );
        let out = String::from_utf8(tty.take()).unwrap();
        assert!(!out.contains("wand"));
        wf.submit("bob", &r, &mut tty);
        assert!(wf.answers().get("wand").is_none());
    }

    #[test]
    fn masked_last_step_restores_echo() {
        let r = Prompts::empty();
        let mut tty = Tty::default();
        let mut wf = Workflow::new(
            vec![Step::new("pin", "pin: ").masked()],
            |_: &Answers, _: &mut Memory, t: &mut Tty| {
                assert!(t.echo.is_enabled());
                Completion::Clear
            },
        )
        .unwrap();

        wf.begin(&r, &mut tty);
        assert!(!tty.echo.is_enabled());
        wf.submit("1234", &r, &mut tty);
        assert!(tty.echo.is_enabled());
        assert!(tty.take().ends_with(&[IAC, WONT, OPT_ECHO]));
    }

    #[test]
    fn abort_restores_echo() {
        let r = Prompts::empty();
        let mut tty = Tty::default();
        let mut wf = Workflow::new(
            vec![Step::new("pw", "pw: ").masked()],
            |_: &Answers, _: &mut Memory, _: &mut Tty| Completion::Clear,
        )
        .unwrap();
        wf.begin(&r, &mut tty);
        assert!(!tty.echo.is_enabled());
        wf.abort(&mut tty);
        assert_eq!(wf.state(), WorkflowState::Aborted);
        assert!(tty.echo.is_enabled());
        assert!(!wf.is_active());
    }

    #[test]
    fn empty_answer_policies() {
        let r = Prompts::empty();
        let mut tty = Tty::default();
        let mut wf = Workflow::new(
            vec![
                Step::new("name", "name: ").on_empty(OnEmpty::Reprompt),
                Step::new("color", "color: ").on_empty(OnEmpty::Default("grey".into())),
                Step::new("sure", "sure? ").on_empty(OnEmpty::Abort),
            ],
            |_: &Answers, _: &mut Memory, _: &mut Tty| Completion::Clear,
        )
        .unwrap();
        wf.begin(&r, &mut tty);
        tty.take();

        assert_eq!(
            wf.submit("", &r, &mut tty),
            Submit::Reprompted { key: "name".into() }
        );
        assert_eq!(tty.take(), b"name: ");
        wf.submit("zed", &r, &mut tty);
        wf.submit("", &r, &mut tty);
        assert_eq!(wf.answers().get("color"), Some("grey"));
        assert_eq!(wf.submit("", &r, &mut tty), Submit::Aborted);
        assert_eq!(wf.state(), WorkflowState::Aborted);
    }

    #[test]
    fn rewind_drops_later_answers_and_memory_survives() {
        let r = Prompts::empty();
        let mut tty = Tty::default();
        let mut wf = Workflow::new(
            vec![Step::new("a", "a: "), Step::new("b", "b: ")],
            |a: &Answers, m: &mut Memory, _: &mut Tty| {
                let tries = m.recall("tries").and_then(|t| t.parse::<u32>().ok()).unwrap_or(0) + 1;
                m.remember("tries", tries.to_string());
                if a.get("b") == Some("bad") {
                    Completion::Rewind("b".into())
                } else {
                    Completion::Keep
                }
            },
        )
        .unwrap();
        wf.begin(&r, &mut tty);
        wf.submit("1", &r, &mut tty);
        assert_eq!(
            wf.submit("bad", &r, &mut tty),
            Submit::Rewound { key: "b".into() }
        );
        assert_eq!(wf.answers().get("a"), Some("1"));
        assert!(wf.answers().get("b").is_none());
        assert_eq!(
            wf.submit("good", &r, &mut tty),
            Submit::Completed(Completion::Keep)
        );
        assert_eq!(wf.recall("tries"), Some("2"));
    }

    #[test]
    fn render_masks_and_merges_extra() {
        let r = Prompts::empty();
        let mut tty = Tty::default();
        let mut wf = Workflow::new(
            vec![
                Step::new("pw", "pw: ").masked(),
                Step::new("ok", "{{ pw }}|{{ hint }}|{{ step }}/{{ steps }}").extra(|_| {
                    let mut b = DataBag::new();
                    b.insert("hint".into(), Value::from("h"));
                    b
                }),
            ],
            |_: &Answers, _: &mut Memory, _: &mut Tty| Completion::Clear,
        )
        .unwrap();
        wf.begin(&r, &mut tty);
        wf.submit("hunter2", &r, &mut tty);
        assert_eq!(wf.render(&r), "|h|2/2");

        let wf = wf.with_mask("****");
        assert_eq!(wf.render(&r), "****|h|2/2");
        assert!(!format!("{wf:?}").contains("hunter2"));
    }

    #[test]
    fn start_keeps_active_workflow() {
        let mut slot: Option<Workflow<Tty>> = None;
        let build = || {
            Workflow::new(
                vec![Step::new("x", "x: ")],
                |_: &Answers, _: &mut Memory, _: &mut Tty| Completion::Clear,
            )
        };

        let (_, is_new) = start(&mut slot, build).unwrap();
        assert!(is_new);
        let (wf, is_new) = start(&mut slot, || Err(WorkflowError::Empty)).unwrap();
        assert!(!is_new);
        assert_eq!(wf.state(), WorkflowState::NotStarted);

        let mut tty = Tty::default();
        if let Some(wf) = slot.as_mut() {
            wf.abort(&mut tty);
        }
        let (_, is_new) = start(&mut slot, build).unwrap();
        assert!(is_new);
    }

    #[test]
    fn rejects_bad_step_lists() {
        let done = |_: &Answers, _: &mut Memory, _: &mut Tty| Completion::Clear;
        assert_eq!(
            Workflow::new(Vec::new(), done).err(),
            Some(WorkflowError::Empty)
        );
        assert_eq!(
            Workflow::new(vec![Step::new("a", ""), Step::new("a", "")], done).err(),
            Some(WorkflowError::DuplicateKey("a".into()))
        );
    }
}
