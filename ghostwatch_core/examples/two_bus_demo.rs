//! Two Bus Demo - "Which Bus Is Real?"
//! ====================================
//!
//! Feeds two batches through the reconciler and map view and prints every
//! command the map receives:
//! - Bus 1 is real, bus 2 is a ghost
//! - Hiding ghosts removes bus 2's marker without a new batch
//! - The next batch omits bus 2, so it is gone for good
//!
//! Run:
//! ```bash
//! cargo run --example two_bus_demo
//! ```

use ghostwatch_core::{
    parse_payload, DisplayFilter, FeedPayload, FleetReconciler, MapViewController, MemorySurface, SurfaceOp,
    Viewport,
};

fn print_ops(label: &str, view: &mut MapViewController<MemorySurface>) {
    println!("── {label}");
    for op in view.surface().ops() {
        match op {
            SurfaceOp::Mount(v) => println!("   mount   ({:.4}, {:.4}) zoom {}", v.center.lat, v.center.lon, v.zoom),
            SurfaceOp::Upsert(id, m) => println!("   upsert  {id:<3} {:?} on {}", m.icon, m.route),
            SurfaceOp::Remove(id) => println!("   remove  {id}"),
        }
    }
    view.surface_mut().clear_ops();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚌 Two Bus Demo");
    println!("===============\n");

    let first = r#"[
        {"id":"1","route":"B1","lat":40.71,"lon":-74.00,"is_ghost":false},
        {"id":"2","route":"B2","lat":40.72,"lon":-74.01,"is_ghost":true}
    ]"#;
    let second = r#"[{"id":"1","route":"B1","lat":40.715,"lon":-74.00,"is_ghost":false}]"#;

    let mut reconciler = FleetReconciler::with_defaults();
    let mut view = MapViewController::new(MemorySurface::new(), Viewport::default());
    let mut filter = DisplayFilter::default();

    if let FeedPayload::Snapshot(batch) = parse_payload(first.as_bytes())? {
        reconciler.apply_batch(batch);
    }
    view.render(&reconciler.snapshot(), &filter);
    print_ops("first batch", &mut view);

    filter.hide_ghosts = true;
    view.render(&reconciler.snapshot(), &filter);
    print_ops("hide ghosts", &mut view);

    if let FeedPayload::Snapshot(batch) = parse_payload(second.as_bytes())? {
        reconciler.apply_batch(batch);
    }
    view.render(&reconciler.snapshot(), &filter);
    print_ops("second batch", &mut view);

    filter.hide_ghosts = false;
    view.render(&reconciler.snapshot(), &filter);
    print_ops("show ghosts", &mut view);

    let stats = reconciler.fleet().stats();
    println!("\n✅ {} vehicle(s) on the map, {} ghost(s)", view.marker_count(), stats.ghosts);
    Ok(())
}
