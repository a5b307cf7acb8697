mod images;
mod usage;
