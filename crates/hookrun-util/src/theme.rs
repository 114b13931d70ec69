use console::Style;

/// Styles for user-facing status lines. Built once by the binary and handed to
/// whatever prints.
#[derive(Clone, Debug)]
pub struct Theme {
    info: Style,
    warning: Style,
    error: Style,
}

impl Theme {
    pub fn colored() -> Self {
        Self {
            info: Style::new().blue().force_styling(true),
            warning: Style::new().yellow().force_styling(true),
            error: Style::new().red().force_styling(true),
        }
    }

    pub fn plain() -> Self {
        Self {
            info: Style::new().force_styling(false),
            warning: Style::new().force_styling(false),
            error: Style::new().force_styling(false),
        }
    }

    /// Colored unless disabled or stderr is not a terminal.
    pub fn detect(no_color: bool) -> Self {
        if no_color || !console::Term::stderr().features().colors_supported() {
            Self::plain()
        } else {
            Self::colored()
        }
    }

    pub fn info(&self, text: &str) -> String {
        self.info.apply_to(text).to_string()
    }

    pub fn warning(&self, text: &str) -> String {
        self.warning.apply_to(text).to_string()
    }

    pub fn error(&self, text: &str) -> String {
        self.error.apply_to(text).to_string()
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::plain()
    }
}
