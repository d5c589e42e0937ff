use plotly::common::color::Rgb;
use plotly::common::{Marker, Mode, Title};
use plotly::layout::{Axis, Layout};
use plotly::{Plot, Scatter};

use crate::Outcome;

/// Opens a chart of admitted and rejected requests per offered rate.
pub fn chart(outcomes: &[Outcome], title: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!outcomes.is_empty(), "nothing to chart");

    let rates: Vec<f64> = outcomes.iter().map(|o| o.rate).collect();
    let admitted: Vec<u64> = outcomes.iter().map(|o| o.admitted).collect();
    let rejected: Vec<u64> = outcomes.iter().map(|o| o.rejected).collect();

    let trace1 = Scatter::new(rates.clone(), admitted)
        .mode(Mode::LinesMarkers)
        .name("Admitted")
        .marker(Marker::new().color(Rgb::new(46, 139, 87)).size(12));
    let trace2 = Scatter::new(rates, rejected)
        .mode(Mode::LinesMarkers)
        .name("Rejected")
        .marker(Marker::new().color(Rgb::new(219, 64, 82)).size(12));

    let layout = Layout::new()
        .title(Title::new(title))
        .x_axis(Axis::new().title(Title::new("Offered rate (requests/sec)")))
        .y_axis(Axis::new().title(Title::new("Requests")));

    let mut plot = Plot::new();
    plot.add_trace(trace1);
    plot.add_trace(trace2);
    plot.set_layout(layout);
    plot.show();

    Ok(())
}
