use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Map Cluster - cluster point files, render heatmap tiles and work with polylines
pub struct Settings {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Cluster a point file at a zoom level and print the resulting markers as JSON
    Cluster {
        /// Point file with one `lat,lng[,weight]` per line
        #[clap(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Camera zoom level
        #[clap(short, long, default_value = "10.0")]
        zoom: f64,

        /// Items closer than this many screen pixels share a cluster
        #[clap(long, default_value = "100.0")]
        max_distance: f64,

        /// Clusters with at most this many items are drawn as their items
        #[clap(long, default_value = "4")]
        min_cluster_size: usize,

        /// Seconds to wait for clustering and rendering to finish
        #[clap(long, default_value = "30")]
        timeout: u64,

        /// Write JSON here instead of stdout
        #[clap(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Render one heatmap tile to a PNG file
    Heatmap {
        /// Point file with one `lat,lng[,weight]` per line
        #[clap(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Tile column
        #[clap(short)]
        x: u32,

        /// Tile row
        #[clap(short)]
        y: u32,

        /// Tile zoom level
        #[clap(short, long)]
        zoom: u32,

        /// Convolution radius in pixels (10-50)
        #[clap(long, default_value = "20")]
        radius: u32,

        /// Overlay opacity (0-1)
        #[clap(long, default_value = "0.7")]
        opacity: f64,

        /// Destination PNG
        #[clap(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Encode a point file as a polyline string
    Encode {
        /// Point file with one `lat,lng` per line
        #[clap(short, long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Decode a polyline string into `lat,lng` lines
    Decode {
        /// Encoded polyline
        polyline: String,
    },

    /// Great-circle distance and initial heading between two points
    Distance {
        /// Start as `lat,lng`
        #[clap(allow_hyphen_values = true)]
        from: String,

        /// End as `lat,lng`
        #[clap(allow_hyphen_values = true)]
        to: String,
    },

    /// Area and perimeter of the polygon in a point file
    Area {
        /// Polygon vertices, one `lat,lng` per line
        #[clap(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Also report whether this `lat,lng` lies inside the polygon
        #[clap(long, allow_hyphen_values = true)]
        contains: Option<String>,
    },
}
