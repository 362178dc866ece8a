use std::fmt::{self, Write};

use cifar_serve::preprocess::{INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH};
use cifar_serve::{Classification, Evaluation, ModelSummary, CLASS_NAMES, NUM_CLASSES};

const BAR_WIDTH: usize = 40;

/// Horizontal bar for a value in [0, 1].
pub fn bar(value: f64, width: usize) -> String {
    let filled = (value.max(0.0).min(1.0) * width as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(width - filled))
}

pub fn model_info(summary: &ModelSummary) -> Result<String, fmt::Error> {
    let mut out = String::new();

    writeln!(out, "Model Architecture")?;
    writeln!(out, "  Backend:          {}", summary.backend)?;
    writeln!(out, "  Source:           {}", summary.source)?;
    writeln!(
        out,
        "  Input Shape:      ({}, {}, {})",
        INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS
    )?;
    writeln!(out, "  Output Classes:   {}", NUM_CLASSES)?;
    writeln!(out, "  Input Tensor:     {}", summary.input)?;
    writeln!(out, "  Output Tensor:    {}", summary.output)?;
    writeln!(out, "  Operations:       {}", summary.operations)?;
    writeln!(out, "  Total Parameters: {}", group_thousands(summary.parameters))?;

    Ok(out)
}

pub fn classification(c: &Classification) -> Result<String, fmt::Error> {
    let mut out = String::new();

    writeln!(out, "Prediction: {}", c.label)?;
    writeln!(out, "Confidence: {:.2}%", c.confidence * 100.0)?;
    writeln!(out)?;
    writeln!(out, "Class Probabilities")?;

    for (name, p) in CLASS_NAMES.iter().zip(&c.probabilities) {
        writeln!(
            out,
            "  {:<10} {} {:>6.2}%",
            name,
            bar(*p as f64, BAR_WIDTH),
            p * 100.0
        )?;
    }

    Ok(out)
}

pub fn evaluation(e: &Evaluation) -> Result<String, fmt::Error> {
    let mut out = String::new();

    writeln!(out, "Test Accuracy:     {:.2}%", e.accuracy * 100.0)?;
    writeln!(out, "Samples Evaluated: {}", e.samples)?;
    writeln!(out, "Classes:           {}", e.confusion.classes())?;
    writeln!(out)?;

    writeln!(out, "Confusion Matrix (rows: true, columns: predicted)")?;
    write!(out, "{:>10}", "")?;
    for name in CLASS_NAMES.iter().take(e.confusion.classes()) {
        write!(out, " {:>5}", abbreviate(name))?;
    }
    writeln!(out)?;
    for (i, name) in CLASS_NAMES.iter().enumerate().take(e.confusion.classes()) {
        write!(out, "{:>10}", name)?;
        for count in e.confusion.row(i) {
            write!(out, " {:>5}", count)?;
        }
        writeln!(out)?;
    }
    writeln!(out)?;

    writeln!(out, "Per-Class Accuracy")?;
    for class in &e.per_class {
        writeln!(
            out,
            "  {:<10} {} {:>6.2}% ({}/{})",
            class.class,
            bar(class.accuracy, BAR_WIDTH),
            class.accuracy * 100.0,
            class.correct,
            class.samples
        )?;
    }

    Ok(out)
}

fn abbreviate(name: &str) -> &str {
    name.get(..5).unwrap_or(name)
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    out
}
