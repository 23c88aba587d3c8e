//! SVG line charts for training curves and ROC plots.
//!
//! Charts are self-contained SVG files so they can be opened in a browser
//! or dropped into a report without a plotting runtime.

use std::fs;
use std::path::Path;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;
const TICKS: usize = 5;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_TERTIARY: &str = "#e74c3c";
pub const COLOR_NEUTRAL: &str = "#7f8c8d";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// A data series for a line chart
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    pub color: String,
    pub dashed: bool,
    pub markers: bool,
}

impl DataSeries {
    pub fn new(name: impl Into<String>, points: Vec<(f64, f64)>, color: &str) -> Self {
        Self {
            name: name.into(),
            points,
            color: color.to_string(),
            dashed: false,
            markers: false,
        }
    }

    pub fn dashed(mut self) -> Self {
        self.dashed = true;
        self
    }

    pub fn with_markers(mut self) -> Self {
        self.markers = true;
        self
    }
}

/// Where the legend box is drawn inside the plot area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegendPosition {
    UpperRight,
    LowerRight,
}

/// Line chart description; `render` produces the SVG text
#[derive(Debug, Clone)]
pub struct LineChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    /// Fixed axis range; `None` fits the data
    pub x_range: Option<(f64, f64)>,
    pub y_range: Option<(f64, f64)>,
    pub legend: LegendPosition,
    pub series: Vec<DataSeries>,
}

impl LineChart {
    pub fn new(title: &str, x_label: &str, y_label: &str) -> Self {
        Self {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            x_range: None,
            y_range: None,
            legend: LegendPosition::UpperRight,
            series: Vec::new(),
        }
    }

    pub fn with_x_range(mut self, min: f64, max: f64) -> Self {
        self.x_range = Some((min, max));
        self
    }

    pub fn with_y_range(mut self, min: f64, max: f64) -> Self {
        self.y_range = Some((min, max));
        self
    }

    pub fn with_legend(mut self, legend: LegendPosition) -> Self {
        self.legend = legend;
        self
    }

    pub fn add_series(mut self, series: DataSeries) -> Self {
        self.series.push(series);
        self
    }

    /// Render the chart as an SVG document
    pub fn render(&self) -> String {
        let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

        let (data_x, data_y) = find_ranges(&self.series);
        let (x_min, x_max) = widen(self.x_range.unwrap_or(data_x));
        let (y_min, y_max) = widen(self.y_range.unwrap_or(data_y));

        let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / (x_max - x_min)) * plot_width;
        let to_y = |y: f64| {
            let clamped = y.clamp(y_min, y_max);
            MARGIN_TOP + plot_height - ((clamped - y_min) / (y_max - y_min)) * plot_height
        };

        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
            w = CHART_WIDTH,
            h = CHART_HEIGHT
        ));
        svg.push_str(&format!(
            r#"<rect width="{}" height="{}" fill="white"/>"#,
            CHART_WIDTH, CHART_HEIGHT
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
            CHART_WIDTH / 2.0,
            COLOR_TEXT,
            escape_xml(&self.title)
        ));

        // Grid and tick labels
        for i in 0..=TICKS {
            let t = i as f64 / TICKS as f64;
            let y = MARGIN_TOP + plot_height - t * plot_height;
            let x = MARGIN_LEFT + t * plot_width;

            svg.push_str(&format!(
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
                MARGIN_LEFT,
                y,
                MARGIN_LEFT + plot_width,
                y,
                COLOR_GRID
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
                MARGIN_LEFT - 10.0,
                y + 4.0,
                COLOR_TEXT,
                format_tick(y_min + t * (y_max - y_min))
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
                x,
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                format_tick(x_min + t * (x_max - x_min))
            ));
        }

        // Axes
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
            MARGIN_LEFT,
            MARGIN_TOP + plot_height,
            MARGIN_LEFT + plot_width,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        ));
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
            MARGIN_LEFT,
            MARGIN_TOP,
            MARGIN_LEFT,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
            MARGIN_LEFT + plot_width / 2.0,
            CHART_HEIGHT - 20.0,
            COLOR_TEXT,
            escape_xml(&self.x_label)
        ));
        svg.push_str(&format!(
            r#"<text x="20" y="{y}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {y})">{}</text>"#,
            COLOR_TEXT,
            escape_xml(&self.y_label),
            y = CHART_HEIGHT / 2.0
        ));

        for series in self.series.iter().filter(|s| !s.points.is_empty()) {
            let path = series
                .points
                .iter()
                .enumerate()
                .map(|(i, &(x, y))| {
                    let cmd = if i == 0 { "M" } else { "L" };
                    format!("{} {:.2} {:.2}", cmd, to_x(x), to_y(y))
                })
                .collect::<Vec<_>>()
                .join(" ");
            let dash = if series.dashed {
                r#" stroke-dasharray="8 6""#
            } else {
                ""
            };
            svg.push_str(&format!(
                r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"{}/>"#,
                path, series.color, dash
            ));

            if series.markers {
                for &(x, y) in &series.points {
                    svg.push_str(&format!(
                        r#"<circle cx="{:.2}" cy="{:.2}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                        to_x(x),
                        to_y(y),
                        series.color
                    ));
                }
            }
        }

        // Legend
        let legend_x = CHART_WIDTH - MARGIN_RIGHT - 230.0;
        let legend_height = 25.0 * self.series.len() as f64;
        let mut legend_y = match self.legend {
            LegendPosition::UpperRight => MARGIN_TOP + 10.0,
            LegendPosition::LowerRight => MARGIN_TOP + plot_height - legend_height - 10.0,
        };
        for series in &self.series {
            svg.push_str(&format!(
                r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
                legend_x, legend_y, series.color
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
                legend_x + 20.0,
                legend_y + 12.0,
                COLOR_TEXT,
                escape_xml(&series.name)
            ));
            legend_y += 25.0;
        }

        svg.push_str("</svg>");
        svg
    }

    /// Render and write the chart, creating parent directories as needed
    pub fn save(&self, output_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(output_path, self.render())
    }
}

fn find_ranges(series: &[DataSeries]) -> ((f64, f64), (f64, f64)) {
    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (f64::INFINITY, f64::NEG_INFINITY);

    for &(px, py) in series.iter().flat_map(|s| s.points.iter()) {
        if px.is_finite() {
            x = (x.0.min(px), x.1.max(px));
        }
        if py.is_finite() {
            y = (y.0.min(py), y.1.max(py));
        }
    }

    if !x.0.is_finite() {
        x = (0.0, 1.0);
    }
    if !y.0.is_finite() {
        y = (0.0, 1.0);
    }
    (x, y)
}

/// Avoid a zero-width axis
fn widen((min, max): (f64, f64)) -> (f64, f64) {
    if (max - min).abs() < f64::EPSILON {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

fn format_tick(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_render_contains_labels_and_legend() {
        let chart = LineChart::new("ROC curve", "False positive rate", "True positive rate")
            .add_series(DataSeries::new(
                "Classifier (area = 0.750)",
                vec![(0.0, 0.0), (0.5, 1.0), (1.0, 1.0)],
                COLOR_PRIMARY,
            ))
            .add_series(DataSeries::new("No skill", vec![(0.0, 0.0), (1.0, 1.0)], COLOR_NEUTRAL).dashed());

        let svg = chart.render();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("ROC curve"));
        assert!(svg.contains("area = 0.750"));
        assert!(svg.contains("stroke-dasharray"));
    }

    #[test]
    fn test_fixed_y_range_ticks() {
        let chart = LineChart::new("Accuracy", "Epoch", "Accuracy")
            .with_y_range(0.2, 1.0)
            .add_series(DataSeries::new("train", vec![(1.0, 0.6), (2.0, 0.8)], COLOR_PRIMARY).with_markers());
        let svg = chart.render();
        assert!(svg.contains(">0.20<"));
        assert!(svg.contains(">1<"));
        assert!(svg.contains("<circle"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a < b & c"), "a &lt; b &amp; c");
    }

    #[test]
    fn test_single_point_series_does_not_divide_by_zero() {
        let chart = LineChart::new("t", "x", "y")
            .add_series(DataSeries::new("one", vec![(1.0, 0.5)], COLOR_PRIMARY));
        assert!(!chart.render().contains("NaN"));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("chart.svg");
        LineChart::new("t", "x", "y").save(&path).unwrap();
        assert!(path.exists());
    }
}
