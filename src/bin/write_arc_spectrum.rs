//! Arc lamp spectrum in electrons
//!
//! Scales the intensities of an arc lamp line list by the spectrograph
//! throughput and writes the result to a FITS table.

use anyhow::Context;
use std::path::PathBuf;
use structopt::StructOpt;
use teststand::arc::{self, Throughput};

#[derive(Debug, StructOpt)]
#[structopt(name = "write_arc_spectrum", about = "Arc lamp lines in electrons")]
struct Opt {
    /// Line list with `wavelength ion intensity` rows
    #[structopt(short, long)]
    infile: PathBuf,
    /// Output FITS file
    #[structopt(short, long)]
    outfile: PathBuf,
    /// DESIMODEL root directory
    #[structopt(long, env = "DESIMODEL")]
    desimodel: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let lines = arc::line_list_from_path(&opt.infile)
        .with_context(|| format!("failed to read {:?}", opt.infile))?;
    let channels = Throughput::channels(&opt.desimodel).with_context(|| {
        format!(
            "failed to load the throughputs from {:?}",
            opt.desimodel.join("data").join("throughput")
        )
    })?;
    let lines = arc::electrons(lines, &channels)?;
    arc::write_fits(&opt.outfile, &lines)?;
    println!("wrote {} lines in {:?}", lines.len(), opt.outfile);

    Ok(())
}
