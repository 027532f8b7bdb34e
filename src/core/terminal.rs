use console::{style, Emoji};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✔", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("✖", "");

const BOX_WIDTH: usize = 72;
const BOX_H: &str = "─";
const BOX_V: &str = "│";
const BOX_BL: &str = "└";
const BOX_DIAMOND: &str = "◇";

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

#[allow(dead_code)]
pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

#[allow(dead_code)]
pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_banner() {
    println!();
    println!(
        "  {} {}",
        style("tinyagi").cyan().bold(),
        style("· personal assistant orchestrator").dim()
    );
    println!();
}

/// A builder for rendering a bordered guide section:
/// ```text
/// ◇ Title ──────────────────────────────────────
/// │
/// │  content
/// │
/// └─────────────────────────────────────────────
/// ```
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

#[allow(dead_code)]
enum GuideLine {
    Text(String),
    Blank,
    Bullet(String),
    Command(String, String),
    Status(String, String),
    Info(String),
    Warn(String),
}

#[allow(dead_code)]
impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn bullet(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Bullet(text.to_string()));
        self
    }

    pub fn command(mut self, cmd: &str, desc: &str) -> Self {
        self.lines
            .push(GuideLine::Command(cmd.to_string(), desc.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Info(text.to_string()));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Warn(text.to_string()));
        self
    }

    pub fn print(&self) {
        let v = style(BOX_V).dim();

        let title_display = format!(" {} ", self.title);
        let title_width = console::measure_text_width(&title_display);
        let remaining = BOX_WIDTH.saturating_sub(title_width + 3).max(4);
        println!(
            " {}{}{}",
            style(BOX_DIAMOND).cyan(),
            style(&title_display).bold(),
            style(&BOX_H.repeat(remaining)).dim()
        );
        println!(" {}", v);

        for line in &self.lines {
            match line {
                GuideLine::Text(t) => println!(" {}  {}", v, t),
                GuideLine::Blank => println!(" {}", v),
                GuideLine::Bullet(t) => println!(" {}   {} {}", v, style("-").dim(), t),
                GuideLine::Command(cmd, desc) => println!(
                    " {}  {:<28} {}",
                    v,
                    style(cmd).cyan(),
                    style(desc).dim()
                ),
                GuideLine::Status(label, value) => {
                    println!(" {}  {:<18} {}", v, style(label).bold(), value)
                }
                GuideLine::Info(t) => println!(" {}  {} {}", v, INFO_ICON, style(t).blue()),
                GuideLine::Warn(t) => println!(" {}  {} {}", v, WARN_ICON, style(t).yellow()),
            }
        }

        println!(" {}", v);
        println!(
            " {}{}",
            style(BOX_BL).dim(),
            style(&BOX_H.repeat(BOX_WIDTH)).dim()
        );
    }
}
