use trace_z0::prelude::*;

fn main() -> Result<(), ExtractError> {
    env_logger::init();

    let stackup = Stackup::new(vec![
        Layer::copper("F.Cu", 35e-6),
        Layer::dielectric("prepreg", 0.1e-3, 4.2),
        Layer::copper("In1.Cu", 35e-6),
        Layer::dielectric("core", 1.2e-3, 4.5),
        Layer::copper("B.Cu", 35e-6),
    ]);
    let mut planes = ReferencePlanes::new();
    // ground pour on the first inner layer stops 1 mm past the end of the pair
    planes.insert(
        "In1.Cu",
        RectRegions::new(vec![Rect::new(R2::new(-5e-3, -5e-3), R2::new(11e-3, 5e-3))]),
    );
    let board = Board::new(stackup, planes);

    let config = ExtractionConfig::default().with_lossless(false);
    let p = Trace::new("usb_p", TracePath::line(R2::new(0.0, 0.2e-3), R2::new(10e-3, 0.2e-3)), 0.15e-3, "F.Cu");
    let n = Trace::new("usb_n", TracePath::line(R2::new(12e-3, -0.2e-3), R2::new(2e-3, -0.2e-3)), 0.15e-3, "F.Cu");
    // usb_n drops to the bottom layer at its far end
    let drop = R2::new(2e-3, -0.2e-3);
    let n_bottom = Trace::new("usb_n_b", TracePath::line(drop, R2::new(2e-3, -3e-3)), 0.15e-3, "B.Cu");
    let via = Via::through("usb_n_v", drop, 0.45e-3, 0.2e-3, &board.stackup)?;
    let p_net = Net::new("USB_P", vec![p]);
    let n_net = Net::new("USB_N", vec![n, n_bottom]).with_vias(vec![via]);

    let extractor = Extractor::new(config)?;
    let model = extractor.extract_coupled_nets(&board, &p_net, &n_net)?;
    for pair in &model.pairs {
        let seg = &pair.segment;
        println!(
            "{}: {:.2} mm  Zodd {:.2}  Zeven {:.2}  Zdiff {:.2}  Zcomm {:.2} ohm",
            seg.name,
            seg.length * 1e3,
            seg.z_odd,
            seg.z_even,
            seg.z_diff(),
            seg.z_common()
        );
    }
    for net in &model.nets {
        println!(
            "{}: Z0 avg {:.2} ohm, td {:.2} ps, v avg {:.3e} m/s",
            net.name,
            net.summary.z0_avg,
            net.summary.td_sum * 1e12,
            net.summary.velocity_avg
        );
    }
    println!("Zodd avg {:.2} ohm, Zeven avg {:.2} ohm\n", model.odd.z0_avg, model.even.z0_avg);
    print!("{}", coupled_nets_netlist(&model));
    Ok(())
}
