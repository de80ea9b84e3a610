use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

/// Control CLI for a LAN file-sharing peer node.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the peer's piece server in the foreground until interrupted.
    Serve {
        /// Address to bind and listen on. Defaults to this host's LAN address.
        #[arg(long)]
        listen_addr: Option<SocketAddr>,

        /// Base URL of the tracker collaborator.
        #[arg(long)]
        tracker_url: Option<url::Url>,

        /// Address of the manifest registry collaborator.
        #[arg(long)]
        registry_addr: Option<SocketAddr>,

        /// Directory reconstructed downloads are written under.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Chunk a file or directory, publish its manifest, and start serving it.
    Upload {
        /// Path to the file or directory to publish.
        path: PathBuf,

        /// Control address of the peer to send the command to.
        #[arg(long, default_value = "127.0.0.1:5005")]
        peer_addr: SocketAddr,
    },

    /// Fetch a published object (or one file within it) from other peers.
    Download {
        /// Root name, or `root/path/to/file` for a single file inside it.
        subpath: String,

        /// Control address of the peer to send the command to.
        #[arg(long, default_value = "127.0.0.1:5005")]
        peer_addr: SocketAddr,
    },

    /// Re-run on-disk reconstruction for an object this peer already holds.
    Construct {
        /// Root name, or `root/path/to/file` for a single file inside it.
        subpath: String,

        /// Control address of the peer to send the command to.
        #[arg(long, default_value = "127.0.0.1:5005")]
        peer_addr: SocketAddr,
    },

    /// List every object currently known to the registry, via the tracker.
    Show {
        /// Base URL of the tracker collaborator.
        #[arg(long)]
        tracker_url: url::Url,
    },
}
