//! Nicely formatted back-transformation output.

use std::fmt;

use log;

const TPDM_BANNER_LENGTH: usize = 103;

/// Logs an error to the `tpdm-output` logger.
macro_rules! tpdm_error {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        log::error!($fmt, $($($arg)*)?);
        log::error!(target: "tpdm-output", $fmt, $($($arg)*)?);
    }
}

/// Logs a warning to the `tpdm-output` logger.
macro_rules! tpdm_warn {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::warn!(target: "tpdm-output", $fmt, $($($arg)*)?); }
}

/// Logs a main output line to the `tpdm-output` logger.
macro_rules! tpdm_output {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::info!(target: "tpdm-output", $fmt, $($($arg)*)?); }
}

pub(crate) use {tpdm_error, tpdm_output, tpdm_warn};

/// Logs a nicely formatted section title to the `tpdm-output` logger.
pub(crate) fn log_title(title: &str) {
    let length = title.chars().count().max(TPDM_BANNER_LENGTH - 6);
    let bar = "─".repeat(length);
    tpdm_output!("┌──{bar}──┐");
    tpdm_output!("│§ {title:^length$} §│");
    tpdm_output!("└──{bar}──┘");
}

/// Writes a nicely formatted subtitle.
pub(crate) fn write_subtitle(f: &mut fmt::Formatter<'_>, subtitle: &str) -> fmt::Result {
    let bar = "═".repeat(subtitle.chars().count());
    writeln!(f, "{subtitle}")?;
    writeln!(f, "{bar}")?;
    Ok(())
}

/// Logs a nicely formatted subtitle to the `tpdm-output` logger.
pub(crate) fn log_subtitle(subtitle: &str) {
    let bar = "═".repeat(subtitle.chars().count());
    tpdm_output!("{}", subtitle);
    tpdm_output!("{}", bar);
}

/// Logs a nicely formatted macro-section beginning to the `tpdm-output` logger.
pub(crate) fn log_macsec_begin(sectitle: &str) {
    let width = TPDM_BANNER_LENGTH - 14;
    let sectitle_space = sectitle.to_string() + " ";
    tpdm_output!("❬❬❬❬❬ [Begin] {sectitle_space:❬<width$}");
}

/// Logs a nicely formatted macro-section ending to the `tpdm-output` logger.
pub(crate) fn log_macsec_end(sectitle: &str) {
    let width = TPDM_BANNER_LENGTH - 14;
    let sectitle_space = sectitle.to_string() + " ";
    tpdm_output!("❭❭❭❭❭ [ End ] {sectitle_space:❭<width$}");
}

/// Turns a boolean into a string of `yes` or `no`.
pub(crate) fn nice_bool(b: bool) -> String {
    if b {
        "yes".to_string()
    } else {
        "no".to_string()
    }
}

/// A trait for logging back-transformation outputs nicely.
pub(crate) trait TpdmOutput: fmt::Display {
    /// Logs display output nicely, line by line.
    fn log_output_display(&self) {
        let lines = self.to_string();
        lines.lines().for_each(|line| {
            tpdm_output!("{line}");
        })
    }
}

// Blanket implementation
impl<T> TpdmOutput for T where T: fmt::Display {}
