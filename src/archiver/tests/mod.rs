//! Archiver tests: batches end to end against a scripted network, and show management.
