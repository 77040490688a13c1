//! Banner formatting for log files and command-line output.

pub const WIDTH: usize = 80;

/// Block off a workflow-level milestone
pub fn major(text: &str) -> String {
    banner('=', text)
}

/// Block off a pass or iteration boundary
pub fn minor(text: &str) -> String {
    banner('+', text)
}

/// Underline a note
pub fn sub(text: &str) -> String {
    format!("{}\n{}", text, "-".repeat(WIDTH))
}

fn banner(fill: char, text: &str) -> String {
    let line = fill.to_string().repeat(WIDTH);
    format!("\n{}\n{:^width$}\n{}", line, text, line, width = WIDTH)
}

/// A bordered block of wrapped text and unwrapped items for CLI output
#[derive(Debug, Clone, Default)]
pub struct CliBlock {
    header: Option<String>,
    text: String,
    items: Vec<String>,
    border: Option<char>,
}

impl CliBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, header: &str) -> Self {
        self.header = Some(header.to_uppercase());
        self
    }

    pub fn items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn border(mut self, border: char) -> Self {
        self.border = Some(border);
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::from("\n");
        if let Some(b) = self.border {
            out.push_str(&b.to_string().repeat(WIDTH));
            out.push('\n');
        }
        if let Some(header) = &self.header {
            out.push_str(&format!("{:^width$}\n", header, width = WIDTH));
            out.push_str(&format!(
                "{:^width$}\n",
                "/".repeat(header.chars().count()),
                width = WIDTH
            ));
        }
        out.push_str(&wrap(&self.text, WIDTH).join("\n"));
        if !self.items.is_empty() {
            out.push_str("\n\n");
            out.push_str(&self.items.join("\n"));
        }
        if let Some(b) = self.border {
            out.push('\n');
            out.push_str(&b.to_string().repeat(WIDTH));
        }
        out.push('\n');
        out
    }
}

impl std::fmt::Display for CliBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Greedy word wrap; words longer than `width` get their own line
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
