use trace_z0::prelude::*;

fn main() -> Result<(), ExtractError> {
    env_logger::init();

    // Two-layer board: 35 µm copper on 0.2 mm FR4, solid ground on the bottom.
    let stackup = Stackup::new(vec![
        Layer::solder_mask("F.Mask", 15e-6, 3.5),
        Layer::copper("F.Cu", 35e-6),
        Layer::dielectric("core", 0.2e-3, 4.3),
        Layer::copper("B.Cu", 35e-6),
    ]);
    let mut planes = ReferencePlanes::new();
    planes.insert("B.Cu", FullPlane);
    let board = Board::new(stackup, planes);

    // 0.2 mm trace with a quarter-turn arc and a 0.3 mm wide tail
    let r = 2e-3;
    let lead = Trace::new("lead", TracePath::line(R2::new(0.0, 0.0), R2::new(5e-3, 0.0)), 0.2e-3, "F.Cu");
    let bend = Trace::new(
        "bend",
        TracePath::arc(
            R2::new(5e-3, 0.0),
            R2::new(5e-3 + r * std::f64::consts::FRAC_1_SQRT_2, r - r * std::f64::consts::FRAC_1_SQRT_2),
            R2::new(5e-3 + r, r),
        )?,
        0.2e-3,
        "F.Cu",
    );
    let tail = Trace::new("tail", TracePath::line(R2::new(5e-3 + r, r), R2::new(5e-3 + r, 8e-3)), 0.3e-3, "F.Cu");
    let net = Net::new("CLK", vec![lead, bend, tail]);

    let extractor = Extractor::new(ExtractionConfig::default().with_model(LineModel::Txl))?;
    let model = extractor.extract_net(&board, &net)?;

    for t in &model.traces {
        for s in &t.segments {
            println!(
                "{:>5} {:>8.3} mm .. {:>8.3} mm  Z0 {:>7.2} ohm  td {:>7.2} ps",
                t.name,
                s.start * 1e3,
                s.end * 1e3,
                s.z0,
                s.delay * 1e12
            );
        }
    }
    println!(
        "net: {:.2} mm, Z0 avg {:.2} ohm, v avg {:.3e} m/s\n",
        model.summary.length * 1e3,
        model.summary.z0_avg,
        model.summary.velocity_avg
    );
    print!("{}", net_netlist(&model));

    if let Some(seg) = model.traces[0].segments.first() {
        println!("\nfrequency(Hz), Z0_re(ohm), Z0_im(ohm), Zin_re(ohm), Zin_im(ohm)");
        for p in impedance_report(&seg.to_line(), &logspace_hz(1.0e6, 1.0e10, 9), CScalar::new(50.0, 0.0)) {
            println!(
                "{:.3e}, {:.4}, {:.4}, {:.4}, {:.4}",
                p.frequency, p.z0.re, p.z0.im, p.z_in.re, p.z_in.im
            );
        }
    }
    Ok(())
}
